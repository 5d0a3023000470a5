//! # Wire Protocol
//!
//! Request/response shapes for the chat-completion style endpoint, plus
//! prompt construction for the supported translation directions.

use serde::{Deserialize, Serialize};

/// Translation direction selecting the prompt sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// English to Chinese
    EnToZh,
    /// Chinese to English
    ZhToEn,
    /// Let the model detect the source language
    Auto,
}

impl Direction {
    /// Stable tag used in cache keys and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::EnToZh => "en2zh",
            Direction::ZhToEn => "zh2en",
            Direction::Auto => "auto",
        }
    }
}

/// One translation call's input
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub text: String,
    pub direction: Direction,
}

impl TranslateRequest {
    pub fn new(text: impl Into<String>, direction: Direction) -> Self {
        Self {
            text: text.into(),
            direction,
        }
    }

    pub(crate) fn prompt(&self) -> String {
        match self.direction {
            Direction::EnToZh => format!(
                "Translate the following English text into Chinese accurately:\n\n{}",
                self.text
            ),
            Direction::ZhToEn => format!(
                "Translate the following Chinese text into English accurately:\n\n{}",
                self.text
            ),
            Direction::Auto => {
                format!("Accurately translate the following text:\n\n{}", self.text)
            }
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoiceMessage {
    pub content: String,
}

/// One frame of a streaming response
#[derive(Deserialize)]
pub(crate) struct StreamFrame {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Deserialize, Default)]
pub(crate) struct StreamDelta {
    pub content: Option<String>,
}
