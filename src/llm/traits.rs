//! Oracle 客户端抽象
//!
//! 单次文本进、文本出：带角色消息 + 模型/温度选择，返回一段补全文本。

use async_trait::async_trait;

use crate::llm::Message;

/// 模型与温度选择
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, String>;

    /// 累计 token 使用：(prompt, completion, total)；默认不统计
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
