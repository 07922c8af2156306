//! 运行过程事件：推送给连接方（步骤进度、工具调用、回复、故障）

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::Step;

/// 单个过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStarted { step: Step, iteration: usize },
    StepFinished { step: Step, success: bool },
    /// 调用工具（参数已归一）
    ToolCall { tool: String, args: serde_json::Value },
    /// 给用户的文本
    Reply { text: String },
    Fault { kind: String, text: String },
}

/// 带连接标识的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

/// 可选的事件出口；未连接时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, connection_id: Option<&str>, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                connection_id: connection_id.map(String::from),
                event,
            });
        }
    }
}
