//! 工具处理器调用契约与本地注册表
//!
//! 外部处理器按 `namespace/handler` 寻址，通过 HandlerInvoker::call 调用，返回 `{success, output}`。
//! HandlerRegistry 是进程内实现：所有 Handler 按路由名注册，输出包进与远端相同的嵌套信封，
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// 处理器调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
}

/// 处理器调用错误：路由不存在属于计划问题，其余为调用方异常
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    #[error("Unknown handler: {0}")]
    UnknownRoute(String),

    #[error("{0}")]
    Failed(String),
}

/// 处理器调用接口（远端服务或本地注册表）
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    async fn call(
        &self,
        portfolio: &str,
        org: &str,
        namespace: &str,
        handler: &str,
        params: Value,
    ) -> Result<HandlerResponse, InvokeError>;
}

/// 进程内处理器
#[async_trait]
pub trait Handler: Send + Sync {
    /// 路由名 `namespace/handler`
    fn route(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 参数 JSON Schema；默认不限
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, params: Value) -> Result<Value, String>;
}

type HandlerFn = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// 用闭包实现的处理器
pub struct FnHandler {
    route: String,
    description: String,
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new(
        route: impl Into<String>,
        description: impl Into<String>,
        f: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            route: route.into(),
            description: description.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Handler for FnHandler {
    fn route(&self) -> &str {
        &self.route
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, params: Value) -> Result<Value, String> {
        (self.f)(params)
    }
}

/// 与远端处理器服务一致的嵌套信封：`output.output.output[-1].output`
pub fn wrap_envelope(route: &str, output: Value) -> Value {
    json!({
        "output": {
            "output": [
                {"handler": route, "output": output}
            ]
        }
    })
}

/// 处理器注册表：按路由名存储 Arc<dyn Handler>
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        let route = handler.route().to_string();
        self.handlers.insert(route, Arc::new(handler));
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(route).cloned()
    }

    pub fn routes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[async_trait]
impl HandlerInvoker for HandlerRegistry {
    async fn call(
        &self,
        _portfolio: &str,
        _org: &str,
        namespace: &str,
        handler: &str,
        params: Value,
    ) -> Result<HandlerResponse, InvokeError> {
        let route = format!("{namespace}/{handler}");
        let h = self
            .get(&route)
            .ok_or_else(|| InvokeError::UnknownRoute(route.clone()))?;
        Ok(match h.execute(params).await {
            Ok(output) => HandlerResponse {
                success: true,
                output: wrap_envelope(&route, output),
            },
            Err(e) => HandlerResponse {
                success: false,
                output: json!({"error": e}),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandlerRegistry {
        let mut reg = HandlerRegistry::new();
        reg.register(FnHandler::new("flights/search", "search flights", |p| {
            Ok(json!({"echo": p["origin"].clone()}))
        }));
        reg.register(FnHandler::new("flights/fail", "always fails", |_| {
            Err("upstream 500".to_string())
        }));
        reg
    }

    #[tokio::test]
    async fn test_call_wraps_envelope() {
        let reg = registry();
        let resp = reg
            .call("p", "o", "flights", "search", json!({"origin": "GRU"}))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.output["output"]["output"][0]["output"], json!({"echo": "GRU"}));
    }

    #[tokio::test]
    async fn test_handler_error_is_unsuccessful_response() {
        let resp = registry().call("p", "o", "flights", "fail", json!({})).await.unwrap();
        assert!(!resp.success);
        assert_eq!(resp.output["error"], json!("upstream 500"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_err() {
        let err = registry().call("p", "o", "hotels", "search", json!({})).await.unwrap_err();
        assert_eq!(err, InvokeError::UnknownRoute("hotels/search".to_string()));
    }
}
