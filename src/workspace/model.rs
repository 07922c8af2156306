//! Workspace 文档模型
//!
//! 每个对话线程一份可变文档：beliefs / desire / action / slots / follow_up / history。
//! history 只追加；beliefs 是合并视图。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 信念键值表
pub type BeliefMap = Map<String, Value>;

/// 信念事件：`{type: "belief", key, val, time}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefEvent {
    #[serde(rename = "type", default = "default_event_type")]
    pub kind: String,
    pub key: String,
    #[serde(default)]
    pub val: Value,
    /// RFC 3339 时间戳，追加时取当前时间（不早于上一条）
    #[serde(default)]
    pub time: String,
}

fn default_event_type() -> String {
    "belief".to_string()
}

impl BeliefEvent {
    pub fn new(key: impl Into<String>, val: Value, time: impl Into<String>) -> Self {
        Self {
            kind: default_event_type(),
            key: key.into(),
            val,
            time: time.into(),
        }
    }
}

/// 待确认描述：下一条消息应被当作对 prompt 的回答
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub expected: bool,
    /// 确认后要进入的步骤名
    #[serde(default)]
    pub callback: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub prompt: String,
}

/// Workspace 的推理状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceState {
    pub beliefs: BeliefMap,
    pub desire: String,
    /// 动作目录中的 key，空串表示未选定
    pub action: String,
    /// 最近一次规划结果
    pub intent: Map<String, Value>,
    /// 最近一次槽位补全结果
    pub slots: Map<String, Value>,
    pub follow_up: Option<FollowUp>,
    pub history: Vec<BeliefEvent>,
    pub is_active: bool,
}

/// 会话级持久化文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub thread: String,
    /// 乐观并发版本号：put 成功后由存储递增
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub created_at: String,
    /// 创建时的种子上下文（如 public_user）
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub state: WorkspaceState,
    /// 工具结果缓存、上一次反思等
    #[serde(default)]
    pub cache: Map<String, Value>,
}

impl Workspace {
    pub fn new(thread: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread: thread.into(),
            version: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
            context,
            state: WorkspaceState {
                is_active: true,
                ..WorkspaceState::default()
            },
            cache: Map::new(),
        }
    }

    /// 是否有待确认的 follow_up
    pub fn awaiting_confirmation(&self) -> bool {
        self.state
            .follow_up
            .as_ref()
            .map(|f| f.expected)
            .unwrap_or(false)
    }
}
