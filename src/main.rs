//! BDI 演示程序
//!
//! 用内存目录、内存 workspace 存储和本地处理器跑一段两轮对话：
//! 第一轮缺少出发地，第二轮补齐后规划、调用工具并反思。
//! `llm.provider = "openai"` 时改用 OpenAI 兼容端点，否则使用脚本化的 Mock。

use std::sync::Arc;

use anyhow::Context;
use bdi::catalog::{ActionDescriptor, InMemoryCatalog, ToolDescriptor};
use bdi::config::{load_config, AppConfig};
use bdi::core::{Orchestrator, RunRequest};
use bdi::llm::{LlmClient, MockLlmClient, OpenAiClient};
use bdi::tools::{FnHandler, HandlerRegistry};
use bdi::workspace::InMemoryWorkspaceStore;
use serde_json::json;

fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    if cfg.llm.provider.eq_ignore_ascii_case("openai") && std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!("Using OpenAI-compatible oracle ({})", cfg.llm.model);
        return Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), None));
    }
    tracing::warn!("No API key set or provider is mock, using scripted oracle");
    Arc::new(scripted_oracle())
}

/// 规则按顺序匹配最后一条 user 消息，先匹配任务专属的规则
fn scripted_oracle() -> MockLlmClient {
    MockLlmClient::new()
        .on(
            "TASK: form_intention",
            r#"```json
{"tool": "search_flights", "params": {"origin": "GRU", "destination": "REC"},
 "filter": {"flights": {"$filter": "price < 600", "$sort_by": "price", "$limit": 1, "items": {"price": true, "carrier": true}}},
 "reasoning": "cheapest flight under budget"}
```"#,
        )
        .on(
            "TASK: reflect_on_success",
            "The cheapest flight to Recife tomorrow is with Azul for 300.",
        )
        .on(
            "Message: I want to fly to Recife tomorrow",
            r#"{perception: {intent: 'book_flight', entities: {destination: 'Recife', date: 'tomorrow'}, needs_tools: ["calendar", "web_search"]},
                desire: 'fly to Recife tomorrow',
                action_match: {confidence: 90, action: 'book_flight', reasoning: 'explicit flight request'},}"#,
        )
        .on(
            "Message: from Sao Paulo",
            r#"{"perception": {"intent": "provide_origin", "entities": {"origin": "GRU"}}, "desire": "fly to Recife tomorrow",
                "action_match": {"confidence": 95, "action": "book_flight"}}"#,
        )
        .on(
            "origin = GRU",
            r#"{"slots": {"origin": "GRU", "destination": "Recife"}, "missing_slots": [], "complete": true}"#,
        )
        .on(
            "TASK: match_slots",
            r#"{"slots": {"destination": "Recife"}, "missing_slots": ["origin"], "complete": false, "human_prompt": "Where will you fly from (origin)?"}"#,
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bdi::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let llm = create_llm_from_config(&cfg);

    let catalog = Arc::new(InMemoryCatalog::new());
    let action: ActionDescriptor = serde_json::from_value(json!({
        "key": "book_flight",
        "goal": "book a flight",
        "name": "Book flight",
        "utterances": ["I want to fly", "book me a flight"],
        "slots": ["origin", "destination"]
    }))
    .context("Invalid demo action")?;
    let tool: ToolDescriptor = serde_json::from_value(json!({
        "key": "search_flights",
        "description": "Search flights between two airports",
        "handler": "flights/search",
        "parameters": {"type": "object", "properties": {"origin": {"type": "string"}, "destination": {"type": "string"}}}
    }))
    .context("Invalid demo tool")?;
    catalog.add_action("demo", &action).await;
    catalog.add_tool("demo", &tool).await;

    let mut handlers = HandlerRegistry::new();
    handlers.register(FnHandler::new("flights/search", "Search flights", |_params| {
        Ok(json!({"flights": [
            {"price": 500, "carrier": "GOL", "id": "G1"},
            {"price": 300, "carrier": "Azul", "id": "A7"},
            {"price": 700, "carrier": "LATAM", "id": "L3"}
        ]}))
    }));

    tracing::info!(routes = ?handlers.routes(), "local handlers registered");

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = Orchestrator::builder(cfg)
        .with_llm(llm.clone())
        .with_store(Arc::new(InMemoryWorkspaceStore::new()))
        .with_catalog(catalog)
        .with_invoker(Arc::new(handlers))
        .with_events(event_tx)
        .build()
        .context("Failed to build orchestrator")?;

    for message in ["I want to fly to Recife tomorrow", "from Sao Paulo"] {
        let request: RunRequest = serde_json::from_value(json!({
            "connection_id": "demo-connection",
            "portfolio": "demo",
            "entity_type": "agent",
            "entity_id": "travel",
            "thread": "demo-thread",
            "data": message
        }))
        .context("Invalid demo request")?;

        println!("> {message}");
        let response = orchestrator.run(request).await;
        while let Ok(event) = event_rx.try_recv() {
            if let bdi::core::AgentEvent::Reply { text } = &event.event {
                println!("< {text}");
            }
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to render response")?
        );
    }

    let (prompt, completion, total) = llm.token_usage();
    tracing::info!(prompt, completion, total, "oracle token usage");
    Ok(())
}
