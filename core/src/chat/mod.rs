//! Chat: prompt assembly and the text-generation boundary
//!
//! This module provides:
//! - `TextGenerator`, the collaborator that turns a prompt into a reply
//! - `LlmClient`, an OpenAI-compatible `TextGenerator`
//! - `render_prompt`, persona + recent turns + the new input
//! - `ChatResponder`, which ties generation to the conversation history

mod client;

pub use client::{LlmClient, LlmClientConfig};

use crate::history::{ConversationHistory, ConversationTurn};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_PERSONA: &str = "# 指示
あなたはチャットボットとして、優しくてかわいいずんだもちの妖精であるずんだもんとして振る舞います。
続く条件に厳密に従ってください。

# 条件
- 一人称は「ぼく」です。
- 名前は「ずんだもん」です。
- フレンドリーな口調で話し、文末には自然な形で「〜のだ」「〜なのだ」を使います。
- どんなジャンルや難易度の内容についても、優しく答えてください。
- 長文は使用せず、200文字以内で、日本語で回答してください。";

/// Turns a prompt into a reply
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub persona: String,
    pub user_label: String,
    pub bot_label: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona: std::env::var("CHAT_PERSONA")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            user_label: std::env::var("CHAT_USER_LABEL").unwrap_or_else(|_| "ユーザー".into()),
            bot_label: std::env::var("CHAT_BOT_LABEL").unwrap_or_else(|_| "ずんだもん".into()),
        }
    }
}

/// Build the generation prompt from persona, recent turns and the new input
pub fn render_prompt(cfg: &ChatConfig, recent: &[ConversationTurn], user_text: &str) -> String {
    let mut conversation = String::new();
    for turn in recent {
        conversation.push_str(&format!("{}: {}\n", cfg.user_label, turn.user_text));
        conversation.push_str(&format!("{}: {}\n", cfg.bot_label, turn.bot_text));
    }
    conversation.push_str(&format!("{}: {}\n", cfg.user_label, user_text));

    format!("{}\n\n# 直近の会話\n{}", cfg.persona.trim_end(), conversation)
}

/// Remove `<@123>` / `<@!123>` mention tokens and surrounding whitespace
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let id = tail.strip_prefix('!').unwrap_or(tail);
        let digits = id.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && id[digits..].starts_with('>') {
            rest = &id[digits + 1..];
        } else {
            out.push_str("<@");
            rest = tail;
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Generates replies with conversational context.
///
/// Failures never escape: a generator error or an empty reply is logged and
/// reported as `None`, and the history is only updated for real replies.
pub struct ChatResponder {
    generator: Arc<dyn TextGenerator>,
    history: Arc<ConversationHistory>,
    cfg: ChatConfig,
}

impl ChatResponder {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        history: Arc<ConversationHistory>,
        cfg: ChatConfig,
    ) -> Self {
        Self {
            generator,
            history,
            cfg,
        }
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub async fn respond(&self, conversation: &str, user_text: &str) -> Option<String> {
        let recent = self.history.get_recent(conversation);
        let prompt = render_prompt(&self.cfg, &recent, user_text);
        debug!(target: "chat", conversation, %prompt, "Conversation prompt");

        match self.generator.generate(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                let reply = reply.trim().to_string();
                self.history.record(conversation, user_text, reply.clone());
                info!(target: "chat", conversation, chars = reply.chars().count(), "Generated reply");
                Some(reply)
            }
            Ok(_) => {
                warn!(target: "chat", conversation, "Generator returned an empty reply");
                None
            }
            Err(e) => {
                warn!(target: "chat", conversation, error = %e, "Text generation failed");
                None
            }
        }
    }
}
