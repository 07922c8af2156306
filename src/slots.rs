//! 槽位 / 动作匹配
//!
//! - SlotMatcher：语义匹配交给 Oracle，但结构约束在本地强制：有缺失槽位时 complete 必为 false，
//!   human_prompt 以缺失槽位列表开头，不会在缺槽时声称完成
//! - select_action：保守的动作选择，已选动作只有在消息明确表达新意图且置信度足够时才替换

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::ActionDescriptor;
use crate::core::AgentError;
use crate::decoder;
use crate::llm::{prompts, CompletionOptions, LlmClient};
use crate::perception::ActionMatch;
use crate::workspace::BeliefEvent;

/// 槽位匹配结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotReport {
    pub slots: Map<String, Value>,
    pub missing_slots: Vec<String>,
    pub complete: bool,
    pub human_prompt: String,
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

impl SlotReport {
    /// 按所需槽位强制结构约束；Oracle 的判断只能让结果更保守
    pub fn enforce(mut self, required: &[String]) -> Self {
        for slot in required {
            if !is_filled(self.slots.get(slot)) && !self.missing_slots.contains(slot) {
                self.missing_slots.push(slot.clone());
            }
        }
        self.missing_slots.retain(|s| !s.trim().is_empty());
        self.complete = self.missing_slots.is_empty();

        if !self.complete {
            // 提示总以缺失槽位开头；Oracle 的追问只保留问句
            let needed = format!("I still need: {}", self.missing_slots.join(", "));
            let question = self.human_prompt.trim();
            self.human_prompt = if question.ends_with('?') {
                format!("{needed}. {question}")
            } else {
                needed
            };
        }
        self
    }

    /// 不经 Oracle 的精确键匹配（解码失败时的降级路径）
    pub fn structural(required: &[String], beliefs: &Map<String, Value>, history: &[BeliefEvent]) -> Self {
        let mut slots = Map::new();
        for slot in required {
            let from_beliefs = beliefs.get(slot).filter(|v| is_filled(Some(*v)));
            let from_history = history
                .iter()
                .rev()
                .find(|ev| &ev.key == slot && is_filled(Some(&ev.val)))
                .map(|ev| &ev.val);
            if let Some(v) = from_beliefs.or(from_history) {
                slots.insert(slot.clone(), v.clone());
            }
        }
        Self {
            slots,
            ..Self::default()
        }
        .enforce(required)
    }
}

/// Oracle 驱动的槽位匹配
pub struct SlotMatcher {
    llm: Arc<dyn LlmClient>,
    options: CompletionOptions,
    timeout: Duration,
}

impl SlotMatcher {
    /// `timeout_secs` 与其他 Oracle 调用共用 `[llm.timeouts] request`
    pub fn new(llm: Arc<dyn LlmClient>, options: CompletionOptions, timeout_secs: u64) -> Self {
        Self {
            llm,
            options,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 解码失败时降级为结构匹配；Oracle 传输错误向上返回
    pub async fn match_slots(
        &self,
        action: &ActionDescriptor,
        beliefs: &Map<String, Value>,
        history: &[BeliefEvent],
    ) -> Result<SlotReport, AgentError> {
        if action.slots.is_empty() {
            return Ok(SlotReport::default().enforce(&[]));
        }
        let messages = prompts::match_slots(action, beliefs, history);
        let text = match tokio::time::timeout(self.timeout, self.llm.complete(&messages, &self.options)).await {
            Ok(result) => result.map_err(AgentError::Oracle)?,
            Err(_) => {
                return Err(AgentError::Oracle(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        match decoder::decode_as::<SlotReport>(&text) {
            Ok(report) => Ok(report.enforce(&action.slots)),
            Err(e) => {
                tracing::warn!(error = %e, action = %action.key, "slot report undecodable, matching by key");
                Ok(SlotReport::structural(&action.slots, beliefs, history))
            }
        }
    }
}

/// 动作选择结果
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDecision {
    pub action: String,
    pub changed: bool,
    pub reason: String,
}

/// 保守的动作选择
///
/// - 当前无动作：候选须在目录中，且置信度不低于 `min_confidence`
/// - 当前有动作：候选须不同、`action_changed` 为真、在目录中，且置信度不低于 `change_confidence`
pub fn select_action(
    current: &str,
    candidate: &ActionMatch,
    catalog: &[ActionDescriptor],
    min_confidence: f64,
    change_confidence: f64,
) -> ActionDecision {
    let keep = |reason: &str| ActionDecision {
        action: current.to_string(),
        changed: false,
        reason: reason.to_string(),
    };
    let in_catalog = catalog.iter().any(|a| a.key == candidate.action);

    if candidate.action.is_empty() || candidate.action == current {
        return keep("no different candidate");
    }
    if !in_catalog {
        return keep("candidate not in catalog");
    }

    if current.is_empty() {
        if candidate.confidence >= min_confidence {
            return ActionDecision {
                action: candidate.action.clone(),
                changed: true,
                reason: candidate.reasoning.clone(),
            };
        }
        return keep("confidence below adoption threshold");
    }

    if !candidate.action_changed {
        return keep("no explicit change of intent");
    }
    if candidate.confidence < change_confidence {
        return keep("confidence below change threshold");
    }
    ActionDecision {
        action: candidate.action.clone(),
        changed: true,
        reason: if candidate.change_reason.is_empty() {
            candidate.reasoning.clone()
        } else {
            candidate.change_reason.clone()
        },
    }
}
