//! Line-oriented command parsing and reply texts.

use zunda_core::{strip_mentions, SegmentOutcome, SpeechReport};

pub const HELP_TEXT: &str = "\
**コマンド一覧:**
  /neko            : 猫の鳴き声を送信します。
  /talk [テキスト] : 指定されたテキストを音声で再生します。(/talk test でテスト音声)
  /join [チャンネル]: 読み上げ先のボイスチャンネルを変更します。
  /leave           : ボイスチャンネルから退出します。
  /stop            : 再生中の音声を止めます。
  /help            : コマンド一覧を表示します。
  それ以外の入力   : ずんだもんと会話できます。";

pub const NEKO_TEXT: &str = "ポンにゃ";
pub const TALK_USAGE: &str = "テキストが空にゃ。/talk の後に 'test' か 読み上げたい文章を入れてにゃ";
pub const JOIN_USAGE: &str = "チャンネル名が空にゃ。/join の後にチャンネル名を入れてにゃ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Neko,
    Talk(String),
    TalkTest,
    TalkEmpty,
    Join(String),
    JoinEmpty,
    Leave,
    Stop,
    Chat(String),
    Empty,
}

/// `rest` of `line` after `name`, if `line` is exactly that command
fn command_arg<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line {
        "/help" => return Command::Help,
        "/neko" => return Command::Neko,
        "/leave" => return Command::Leave,
        "/stop" => return Command::Stop,
        _ => {}
    }
    if let Some(text) = command_arg(line, "/talk") {
        return match text {
            "" => Command::TalkEmpty,
            t if t.eq_ignore_ascii_case("test") => Command::TalkTest,
            t => Command::Talk(t.to_string()),
        };
    }
    if let Some(channel) = command_arg(line, "/join") {
        return if channel.is_empty() {
            Command::JoinEmpty
        } else {
            Command::Join(channel.to_string())
        };
    }

    let text = strip_mentions(line);
    if text.is_empty() {
        Command::Empty
    } else {
        Command::Chat(text)
    }
}

/// One-line summary of a speech run for the console
pub fn describe_report(report: &SpeechReport) -> String {
    if let Some(err) = &report.fatal {
        return format!("音声を再生できなかったにゃ: {err}");
    }
    if report.synthesized() == 0 {
        return "音声合成に失敗したにゃ".to_string();
    }
    let mut line = format!(
        "音声を再生するにゃ ({}/{} セグメント)",
        report.played(),
        report.segments()
    );
    let failed: Vec<String> = report
        .outcomes
        .iter()
        .filter_map(|o| match o {
            SegmentOutcome::Failed { index, .. } => Some((index + 1).to_string()),
            SegmentOutcome::Synthesized { .. } => None,
        })
        .collect();
    if !failed.is_empty() {
        line.push_str(&format!(" 合成失敗: {}", failed.join(",")));
    }
    if let Some(reason) = report
        .playback
        .as_ref()
        .and_then(|p| p.abandon_reason.as_ref())
    {
        line.push_str(&format!(" 中断: {reason}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use zunda_core::{PlaybackReport, ZundaError};

    #[test]
    fn parses_fixed_commands() {
        assert_eq!(parse("/help"), Command::Help);
        assert_eq!(parse("  /neko  "), Command::Neko);
        assert_eq!(parse("/leave"), Command::Leave);
        assert_eq!(parse("/stop"), Command::Stop);
        assert_eq!(parse(""), Command::Empty);
    }

    #[test]
    fn parses_talk() {
        assert_eq!(parse("/talk"), Command::TalkEmpty);
        assert_eq!(parse("/talk   "), Command::TalkEmpty);
        assert_eq!(parse("/talk test"), Command::TalkTest);
        assert_eq!(parse("/talk TEST"), Command::TalkTest);
        assert_eq!(parse("/talk こんにちは"), Command::Talk("こんにちは".into()));
        // not the talk command
        assert_eq!(parse("/talking"), Command::Chat("/talking".into()));
    }

    #[test]
    fn parses_join_and_chat() {
        assert_eq!(parse("/join lobby"), Command::Join("lobby".into()));
        assert_eq!(parse("/join"), Command::JoinEmpty);
        assert_eq!(parse("<@123> 元気？"), Command::Chat("元気？".into()));
        assert_eq!(parse("<@!123>"), Command::Empty);
    }

    #[test]
    fn describes_partial_report() {
        let report = SpeechReport {
            outcomes: vec![
                SegmentOutcome::Synthesized {
                    index: 0,
                    path: PathBuf::from("a.wav"),
                },
                SegmentOutcome::Failed {
                    index: 1,
                    error: "boom".into(),
                },
            ],
            playback: Some(PlaybackReport {
                played: vec![0],
                ..Default::default()
            }),
            fatal: None,
        };
        assert_eq!(describe_report(&report), "音声を再生するにゃ (1/2 セグメント) 合成失敗: 2");
    }

    #[test]
    fn describes_fatal_report() {
        let report = SpeechReport {
            fatal: Some(ZundaError::Playback("no device".into())),
            ..Default::default()
        };
        assert!(describe_report(&report).contains("no device"));
    }
}
