//! Text segmenter for speech synthesis.
//!
//! Long replies are cut into evenly sized pieces before they are sent to the
//! synthesis backend. Sizes are counted in Unicode code points, never bytes,
//! so Japanese text splits at the same positions as ASCII text of equal
//! length.

/// Default upper bound on segment length, in code points.
pub const DEFAULT_MAX_SEGMENT_CHARS: usize = 300;

/// One slice of a longer text, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 0-based position in the batch
    pub index: usize,
    /// Number of segments in the batch
    pub total: usize,
    pub text: String,
}

/// Split `text` into contiguous parts of at most `max_chars` code points.
///
/// Text that already fits is returned unsplit (the empty string yields
/// `[""]`). Otherwise the number of parts is fixed first and the part size is
/// spread evenly across them, so 1000 characters at a limit of 300 become four
/// parts of 250 rather than 300/300/300/100.
///
/// With `n` characters, limit `m`, `k = ceil(n / m)` parts and part size
/// `p = ceil(n / k)`: since `k >= n / m` we get `n / k <= m`, and because `m`
/// is an integer `p <= m`. Every part therefore respects the limit without a
/// second splitting pass. A `max_chars` of 0 is treated as 1.
pub fn segment(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let len = text.chars().count();
    if len <= max_chars {
        return vec![text.to_string()];
    }

    let num_parts = len.div_ceil(max_chars);
    let part_size = len.div_ceil(num_parts);

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    (0..num_parts)
        .map(|i| {
            let start = (i * part_size).min(len);
            let end = if i + 1 < num_parts {
                ((i + 1) * part_size).min(len)
            } else {
                len
            };
            text[boundaries[start]..boundaries[end]].to_string()
        })
        .collect()
}

/// Like [`segment`] but returns indexed [`Segment`] values.
pub fn segments(text: &str, max_chars: usize) -> Vec<Segment> {
    let parts = segment(text, max_chars);
    let total = parts.len();
    parts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Segment { index, total, text })
        .collect()
}
