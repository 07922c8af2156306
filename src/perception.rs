//! 分类结果：一次 Oracle 调用同时完成感知、信息加工、事实抽取、意愿识别与动作匹配

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::workspace::BeliefEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Perception {
    pub intent: String,
    pub entities: Map<String, Value>,
    pub raw_text: String,
    pub needs_tools: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessedInfo {
    pub enriched_entities: Map<String, Value>,
    pub missing_beliefs: Vec<String>,
    pub normalized_values: Map<String, Value>,
}

/// 动作匹配建议；是否采纳由 ActionSelector 决定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMatch {
    #[serde(deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    pub action: String,
    pub reasoning: String,
    pub action_changed: bool,
    pub change_reason: String,
}

/// Oracle 有时把置信度写成字符串或 0-1 小数
fn lenient_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(d)?;
    let n = match &v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    // 整数 1 视为百分制的 1，不放大
    Ok(if n > 0.0 && n < 1.0 { n * 100.0 } else { n })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    pub perception: Perception,
    pub processed_info: ProcessedInfo,
    pub facts: Map<String, Value>,
    pub desire: String,
    pub action_match: ActionMatch,
    pub belief_history_updates: Vec<BeliefEvent>,
}

impl Classification {
    /// 解码失败时的降级结构
    pub fn fallback(message: &str) -> Self {
        Self {
            perception: Perception {
                intent: "unknown".to_string(),
                raw_text: message.to_string(),
                ..Perception::default()
            },
            ..Self::default()
        }
    }

    /// 要写入历史的 (key, val)：优先用 belief_history_updates，否则用感知到的实体
    pub fn history_entries(&self) -> Vec<(String, Value)> {
        if !self.belief_history_updates.is_empty() {
            return self
                .belief_history_updates
                .iter()
                .filter(|ev| !ev.key.is_empty())
                .map(|ev| (ev.key.clone(), ev.val.clone()))
                .collect();
        }
        self.perception
            .entities
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
