//! 错误恢复引擎
//!
//! 根据 AgentError 的大类返回 RecoveryAction，供各步骤决定是降级、转入反思、结束本步还是中止整轮。

use crate::core::{AgentError, FaultKind, RecoveryAction};

/// 语义化错误恢复：错误 -> 动作；不包含任何重试
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err.kind() {
            FaultKind::Decode => RecoveryAction::FallbackToDefault,
            FaultKind::Plan => RecoveryAction::Reflect(err.to_string()),
            FaultKind::Guard => RecoveryAction::Abort,
            FaultKind::Collaborator => RecoveryAction::FailStep(err.to_string()),
        }
    }
}
