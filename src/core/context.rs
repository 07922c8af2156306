//! 单次运行的请求与上下文
//!
//! RequestContext 在每次 run 开始时新建，仅在本轮内传递，从不跨轮复用。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::catalog::{ActionDescriptor, ToolDescriptor};
use crate::core::AgentError;
use crate::perception::Classification;
use crate::slots::SlotReport;
use crate::tools::ToolOutcome;
use crate::workspace::{BeliefMap, WorkspaceRef};

/// 入口请求：`{connection_id?, portfolio, org, entity_type, entity_id, thread, workspace?, data}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default, alias = "connectionId")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub portfolio: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub public_user: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub thread: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    /// 用户消息：字符串，或带 `message` 字段的对象
    #[serde(default)]
    pub data: Value,
}

impl RunRequest {
    pub fn message(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// 入口返回：成功时 output 为 step trace，失败时为 trace 或错误文本
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub output: Value,
    /// 守卫中止时已完成的 step trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

impl RunResponse {
    pub fn new(success: bool, output: Value) -> Self {
        Self { success, output, trace: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(false, Value::String(message.into()))
    }

    pub fn with_trace(mut self, trace: Value) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// 规划结果：`{tool, params, filter, reasoning}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// 工具目录中的 key
    #[serde(default, alias = "action")]
    pub tool: String,
    /// 工具参数对象
    #[serde(default, alias = "arguments")]
    pub params: Value,
    /// 对工具输出的投影，null 表示不裁剪
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub reasoning: String,
}

impl Plan {
    pub fn to_map(&self) -> serde_json::Map<String, Value> {
        match json!(self) {
            Value::Object(m) => m,
            _ => serde_json::Map::new(),
        }
    }
}

/// 请求级上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub connection_id: Option<String>,
    pub portfolio: String,
    pub org: String,
    pub public_user: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub thread: String,
    pub workspace_id: Option<String>,
    pub message: String,

    pub actions: Vec<ActionDescriptor>,
    pub tools: Vec<ToolDescriptor>,

    pub beliefs: BeliefMap,
    pub desire: String,
    pub action: String,
    pub classification: Option<Classification>,
    pub slot_report: Option<SlotReport>,
    pub plan: Option<Plan>,
    pub last_result: Option<ToolOutcome>,
    pub last_error: Option<String>,
    pub last_reflection: Option<String>,
    /// 本轮给用户的回复
    pub reply: Option<String>,
}

fn required(value: &Option<String>, field: &str) -> Result<String, AgentError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| AgentError::InvalidRequest(format!("No {field} provided")))
}

impl RequestContext {
    /// 校验请求并创建本轮上下文
    pub fn from_request(req: &RunRequest, default_org: &str) -> Result<Self, AgentError> {
        let portfolio = required(&req.portfolio, "portfolio")?;
        let entity_type = required(&req.entity_type, "entity_type")?;
        let entity_id = required(&req.entity_id, "entity_id")?;
        let thread = required(&req.thread, "thread")?;
        let org = req
            .org
            .clone()
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| default_org.to_string());

        Ok(Self {
            connection_id: req.connection_id.clone(),
            portfolio,
            org,
            public_user: req.public_user.clone(),
            entity_type,
            entity_id,
            thread,
            workspace_id: req.workspace.clone().filter(|w| !w.is_empty()),
            message: req.message(),
            ..Self::default()
        })
    }

    pub fn workspace_ref(&self) -> WorkspaceRef<'_> {
        WorkspaceRef {
            thread: &self.thread,
            workspace_id: self.workspace_id.as_deref(),
            public_user: self.public_user.as_deref(),
        }
    }

    pub fn action_descriptor(&self) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.key == self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        serde_json::from_value(json!({
            "connectionId": "c1",
            "portfolio": "p1",
            "entity_type": "agent",
            "entity_id": "e1",
            "thread": "t1",
            "data": "I want to fly to Recife"
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_request_defaults_org() {
        let ctx = RequestContext::from_request(&request(), "_all").unwrap();
        assert_eq!(ctx.org, "_all");
        assert_eq!(ctx.connection_id.as_deref(), Some("c1"));
        assert_eq!(ctx.message, "I want to fly to Recife");
        assert!(ctx.workspace_id.is_none());
    }

    #[test]
    fn test_missing_fields_rejected() {
        for field in ["portfolio", "entity_type", "entity_id", "thread"] {
            let mut v = serde_json::to_value(request()).unwrap();
            v.as_object_mut().unwrap().remove(field);
            let req: RunRequest = serde_json::from_value(v).unwrap();
            let err = RequestContext::from_request(&req, "_all").unwrap_err();
            assert_eq!(err.to_string(), format!("No {field} provided"));
        }
    }

    #[test]
    fn test_message_from_object_data() {
        let mut req = request();
        req.data = json!({"message": "hi"});
        assert_eq!(req.message(), "hi");
        req.data = json!(42);
        assert_eq!(req.message(), "");
    }

    #[test]
    fn test_plan_accepts_aliases() {
        let plan: Plan = serde_json::from_value(json!({
            "action": "search_flights",
            "arguments": {"origin": "GRU"}
        }))
        .unwrap();
        assert_eq!(plan.tool, "search_flights");
        assert_eq!(plan.params["origin"], json!("GRU"));
        assert!(plan.filter.is_none());
    }
}
