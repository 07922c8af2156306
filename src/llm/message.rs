//! Oracle 消息
//!
//! 带角色的消息，以及送入 Oracle 前的整理工具：旧工具结果清空、信念表渲染为一行文本。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// 只保留最后 `keep` 条工具消息的内容，更早的清空，避免旧工具输出淹没上下文
pub fn clear_stale_tool_content(messages: &mut [Message], keep: usize) {
    let mut remaining = keep;
    for msg in messages.iter_mut().rev() {
        if msg.role != Role::Tool {
            continue;
        }
        if remaining > 0 {
            remaining -= 1;
        } else {
            msg.content.clear();
        }
    }
}

/// `{"origin": "NYC", "guests": 4}` -> `origin = NYC, guests = 4`
pub fn string_from_object(object: &Map<String, Value>) -> String {
    object
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k} = {s}"),
            other => format!("{k} = {other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
