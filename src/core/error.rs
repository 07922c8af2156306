//! Agent 错误类型与恢复动作
//!
//! 错误分四类（FaultKind）：解码、计划、守卫、协作方；RecoveryEngine 据此给出唯一的 RecoveryAction。
//! 核心从不自动重试。

use thiserror::Error;

use crate::core::step::Step;
use crate::decoder::DecodeError;
use crate::projection::ProjectionError;
use crate::workspace::StoreError;

/// 一轮运行中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    WorkspaceStore(#[from] StoreError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("No handler found for tool '{0}'")]
    HandlerNotFound(String),

    #[error("Handler is empty for tool '{0}'")]
    EmptyHandler(String),

    #[error("{0} is not a valid tool")]
    InvalidToolRoute(String),

    #[error("No handler registered at route '{0}'")]
    UnknownRoute(String),

    #[error("Plan does not name a tool")]
    EmptyPlan,

    #[error("Invalid tool parameters: {0}")]
    InvalidParams(String),

    #[error("Cycle detected: step '{0}' already visited in this run")]
    CycleDetected(Step),

    #[error("Iteration budget exceeded: more than {limit} steps")]
    IterationBudgetExceeded { limit: usize },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 错误大类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Oracle 输出不可解析：就地降级或中止当前步
    Decode,
    /// 工具引用错误：转入失败反思
    Plan,
    /// 环路 / 步数上限：整轮终止
    Guard,
    /// 存储、目录、Oracle 传输、工具调用异常：本步失败
    Collaborator,
}

impl AgentError {
    pub fn kind(&self) -> FaultKind {
        match self {
            AgentError::Decode(_) => FaultKind::Decode,
            AgentError::Projection(_)
            | AgentError::HandlerNotFound(_)
            | AgentError::EmptyHandler(_)
            | AgentError::InvalidToolRoute(_)
            | AgentError::UnknownRoute(_)
            | AgentError::EmptyPlan
            | AgentError::InvalidParams(_) => FaultKind::Plan,
            AgentError::CycleDetected(_) | AgentError::IterationBudgetExceeded { .. } => {
                FaultKind::Guard
            }
            AgentError::WorkspaceStore(_)
            | AgentError::InvalidRequest(_)
            | AgentError::Catalog(_)
            | AgentError::Oracle(_)
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::ConfigError(_) => FaultKind::Collaborator,
        }
    }
}

/// 恢复引擎根据错误类型给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 使用默认结构继续
    FallbackToDefault,
    /// 转入 reflect_on_failure，携带要反思的错误描述
    Reflect(String),
    /// 以 success:false 结束本步（从而结束本轮）
    FailStep(String),
    /// 守卫触发，整轮中止
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(AgentError::EmptyPlan.kind(), FaultKind::Plan);
        assert_eq!(AgentError::CycleDetected(Step::Reason).kind(), FaultKind::Guard);
        assert_eq!(AgentError::Oracle("down".into()).kind(), FaultKind::Collaborator);
        assert_eq!(
            AgentError::IterationBudgetExceeded { limit: 10 }.kind(),
            FaultKind::Guard
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            AgentError::HandlerNotFound("search_flights".into()).to_string(),
            "No handler found for tool 'search_flights'"
        );
        assert_eq!(
            AgentError::InvalidToolRoute("book".into()).to_string(),
            "book is not a valid tool"
        );
        assert_eq!(
            AgentError::CycleDetected(Step::CompleteSlots).to_string(),
            "Cycle detected: step 'complete_slots' already visited in this run"
        );
    }
}
