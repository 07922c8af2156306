//! 工具执行适配器
//!
//! 把计划中的工具 key 解析为 `namespace/handler`，注入 `_filter` 与请求上下文参数，
//! 在超时内调用外部处理器，再把嵌套信封归一为 `{action, input, output}`，并按计划中的投影裁剪输出。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::catalog::ToolDescriptor;
use crate::core::{AgentError, Plan, RequestContext};
use crate::decoder;
use crate::projection::project;
use crate::tools::{HandlerInvoker, InvokeError};

/// 归一化后的工具结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    /// 计划中的工具 key
    pub action: String,
    /// `namespace/handler`
    pub route: String,
    pub input: Value,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<Value>,
}

impl ToolOutcome {
    /// Workspace cache 中的键
    pub fn cache_key(&self) -> String {
        format!("irn:tool_rs:{}", self.route)
    }
}

/// 解析工具 key -> (namespace, handler)
pub fn resolve_route(tools: &[ToolDescriptor], tool: &str) -> Result<(String, String), AgentError> {
    let descriptor = tools
        .iter()
        .find(|t| t.key == tool)
        .ok_or_else(|| AgentError::HandlerNotFound(tool.to_string()))?;
    if descriptor.handler.trim().is_empty() {
        return Err(AgentError::EmptyHandler(tool.to_string()));
    }
    let parts: Vec<&str> = descriptor.handler.split('/').collect();
    match parts.as_slice() {
        [ns, handler] if !ns.is_empty() && !handler.is_empty() => {
            Ok((ns.to_string(), handler.to_string()))
        }
        _ => Err(AgentError::InvalidToolRoute(tool.to_string())),
    }
}

/// 计划参数归一为对象：字符串（含双重转义）先解码
pub fn prepare_params(params: &Value) -> Result<Map<String, Value>, AgentError> {
    let value = match params {
        Value::Null => return Ok(Map::new()),
        Value::String(s) => match decoder::remove_outer_escape(s) {
            Some(v) => v,
            None => decoder::decode(s).map_err(|_| AgentError::InvalidParams(s.clone()))?,
        },
        other => other.clone(),
    };
    match value {
        Value::Object(m) => Ok(m),
        other => Err(AgentError::InvalidParams(other.to_string())),
    }
}

/// 取 `output.output.output[-1]` 的 output 与 interface；不是信封时原样返回
pub fn unwrap_envelope(output: &Value) -> (Value, Option<Value>) {
    let last = output
        .get("output")
        .and_then(|o| o.get("output"))
        .and_then(Value::as_array)
        .and_then(|steps| steps.last());
    match last {
        Some(step) => (
            step.get("output").cloned().unwrap_or(Value::Null),
            step.get("interface").cloned(),
        ),
        None => (output.clone(), None),
    }
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    invoker: Arc<dyn HandlerInvoker>,
    timeout: Duration,
    preview_chars: usize,
}

impl ToolExecutor {
    pub fn new(invoker: Arc<dyn HandlerInvoker>, timeout_secs: u64) -> Self {
        Self {
            invoker,
            timeout: Duration::from_secs(timeout_secs),
            preview_chars: 200,
        }
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// 执行计划；计划错误返回 HandlerNotFound / EmptyHandler / InvalidToolRoute，
    /// 调用失败返回 ToolExecutionFailed / ToolTimeout
    pub async fn execute(&self, ctx: &RequestContext, plan: &Plan) -> Result<ToolOutcome, AgentError> {
        if plan.tool.trim().is_empty() {
            return Err(AgentError::EmptyPlan);
        }
        let (namespace, handler) = resolve_route(&ctx.tools, &plan.tool)?;
        let route = format!("{namespace}/{handler}");

        let mut params = prepare_params(&plan.params)?;
        let input = Value::Object(params.clone());
        params.insert("_filter".into(), plan.filter.clone().unwrap_or(Value::Null));
        params.insert("_portfolio".into(), Value::String(ctx.portfolio.clone()));
        params.insert("_org".into(), Value::String(ctx.org.clone()));
        params.insert("_entity_type".into(), Value::String(ctx.entity_type.clone()));
        params.insert("_entity_id".into(), Value::String(ctx.entity_id.clone()));
        params.insert("_thread".into(), Value::String(ctx.thread.clone()));
        let params = Value::Object(params);

        let start = Instant::now();
        let args_preview = preview(&input, self.preview_chars);
        let result = timeout(
            self.timeout,
            self.invoker
                .call(&ctx.portfolio, &ctx.org, &namespace, &handler, params),
        )
        .await;

        let outcome = match &result {
            Ok(Ok(resp)) if resp.success => "ok",
            Ok(_) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": plan.tool,
            "route": route,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let response = match result {
            Ok(Ok(resp)) => resp,
            Ok(Err(InvokeError::UnknownRoute(missing))) => return Err(AgentError::UnknownRoute(missing)),
            Ok(Err(InvokeError::Failed(e))) => return Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => return Err(AgentError::ToolTimeout(route)),
        };
        if !response.success {
            return Err(AgentError::ToolExecutionFailed(response.output.to_string()));
        }

        let (raw, interface) = unwrap_envelope(&response.output);
        let output = match plan.filter.as_ref().filter(|f| !f.is_null()) {
            Some(projection) => project(&raw, projection)?,
            None => raw,
        };

        Ok(ToolOutcome {
            action: plan.tool.clone(),
            route,
            input,
            output,
            interface,
        })
    }
}

fn preview(args: &Value, chars: usize) -> String {
    let s = args.to_string();
    if s.chars().count() > chars {
        format!("{}...", s.chars().take(chars).collect::<String>())
    } else {
        s
    }
}
