use std::sync::Arc;
use zunda_core::{ConversationHistory, ConversationTurn};

#[test]
fn test_keeps_last_three_turns() {
    let history = ConversationHistory::new();
    for i in 1..=4 {
        history.record("channel-1", format!("u{i}"), format!("b{i}"));
    }

    let recent = history.get_recent("channel-1");
    assert_eq!(
        recent,
        vec![
            ConversationTurn::new("u2", "b2"),
            ConversationTurn::new("u3", "b3"),
            ConversationTurn::new("u4", "b4"),
        ]
    );
}

#[test]
fn test_custom_capacity() {
    let history = ConversationHistory::with_capacity(1);
    history.record("k", "first", "1");
    history.record("k", "second", "2");
    assert_eq!(history.get_recent("k"), vec![ConversationTurn::new("second", "2")]);

    // zero is clamped so the latest turn is still kept
    let history = ConversationHistory::with_capacity(0);
    history.record("k", "only", "x");
    assert_eq!(history.get_recent("k").len(), 1);
}

#[tokio::test]
async fn test_concurrent_tasks_share_history() {
    let history = Arc::new(ConversationHistory::new());
    let mut handles = Vec::new();
    for t in 0..8 {
        let history = Arc::clone(&history);
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                history.record("shared", format!("t{t}-{i}"), "ok");
                history.record(&format!("own-{t}"), format!("{i}"), "ok");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(history.get_recent("shared").len(), 3);
    assert_eq!(history.len(), 9);
    let own = history.get_recent("own-5");
    assert_eq!(own.last().map(|t| t.user_text.as_str()), Some("24"));
}
