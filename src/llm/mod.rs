//! LLM 层：Oracle 客户端抽象与实现（OpenAI 兼容 / Mock）、消息整理与 prompt 构建

pub mod message;
pub mod mock;
pub mod openai;
pub mod prompts;
pub mod traits;

pub use message::{clear_stale_tool_content, string_from_object, Message, Role};
pub use mock::{MockLlmClient, RecordedCall};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{CompletionOptions, LlmClient};
