//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 两种脚本：按 marker 匹配最后一条 user 消息的规则（可重复命中），以及按顺序消费的应答队列。
//! 每次调用都会记录下来，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, Message, Role};

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
}

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    rules: Vec<(String, String)>,
    queue: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最后一条 user 消息包含 marker 时返回 response
    pub fn on(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((marker.into(), response.into()));
        self
    }

    /// 规则都不匹配时按顺序返回
    pub fn then(self, response: impl Into<String>) -> Self {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(response.into());
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
            });
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if let Some((_, response)) = self.rules.iter().find(|(marker, _)| last_user.contains(marker.as_str())) {
            return Ok(response.clone());
        }

        self.queue
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .ok_or_else(|| "mock oracle has no scripted response".to_string())
    }
}
