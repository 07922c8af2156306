//! 步骤标识与单步结果
//!
//! 步骤是封闭枚举，调度器对其做穷尽分发；结果统一为 `{success, next_step, output}`。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单轮对话中的推理步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// 有待确认的 follow_up 时的入口
    Confirm,
    Classify,
    Enrich,
    Reason,
    CompleteSlots,
    FormIntention,
    ExecuteIntention,
    ReflectOnSuccess,
    ReflectOnFailure,
    /// 唯一的接受终态
    Finishing,
}

impl Step {
    pub const ALL: [Step; 10] = [
        Step::Confirm,
        Step::Classify,
        Step::Enrich,
        Step::Reason,
        Step::CompleteSlots,
        Step::FormIntention,
        Step::ExecuteIntention,
        Step::ReflectOnSuccess,
        Step::ReflectOnFailure,
        Step::Finishing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Confirm => "confirm",
            Step::Classify => "classify",
            Step::Enrich => "enrich",
            Step::Reason => "reason",
            Step::CompleteSlots => "complete_slots",
            Step::FormIntention => "form_intention",
            Step::ExecuteIntention => "execute_intention",
            Step::ReflectOnSuccess => "reflect_on_success",
            Step::ReflectOnFailure => "reflect_on_failure",
            Step::Finishing => "finishing",
        }
    }

    /// 按名称查找（follow_up.callback 中保存的是步骤名）
    pub fn from_name(name: &str) -> Option<Step> {
        Step::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单步执行结果，按顺序累积为本轮的 step trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: Step,
    pub success: bool,
    /// None 表示终止（finishing 或失败）
    pub next_step: Option<Step>,
    pub output: Value,
}

impl StepResult {
    pub fn advance(step: Step, next: Step, output: Value) -> Self {
        Self {
            step,
            success: true,
            next_step: Some(next),
            output,
        }
    }

    pub fn finish(step: Step, output: Value) -> Self {
        Self {
            step,
            success: true,
            next_step: None,
            output,
        }
    }

    pub fn failed(step: Step, output: Value) -> Self {
        Self {
            step,
            success: false,
            next_step: None,
            output,
        }
    }
}
