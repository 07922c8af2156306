//! 编排器端到端集成测试：Mock Oracle + 内存存储 + 内存目录 + 本地处理器

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bdi::catalog::{ActionDescriptor, InMemoryCatalog, ToolDescriptor};
    use bdi::config::AppConfig;
    use bdi::core::{AgentEvent, Orchestrator, ProgressEvent, RunRequest, RunResponse};
    use bdi::llm::MockLlmClient;
    use bdi::tools::{BeliefResolvers, FnHandler, HandlerRegistry};
    use bdi::workspace::{InMemoryWorkspaceStore, Workspace, WorkspaceStore};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    const CLASSIFY_FLIGHT: &str = r#"{"perception": {"intent": "book_flight", "entities": {"origin": "GRU", "destination": "REC"}},
        "desire": "fly from GRU to REC",
        "action_match": {"confidence": 90, "action": "book_flight", "reasoning": "flight request"}}"#;
    const SLOTS_COMPLETE: &str =
        r#"{"slots": {"origin": "GRU", "destination": "REC"}, "missing_slots": [], "complete": true, "human_prompt": ""}"#;
    const PLAN_SEARCH: &str = r#"{"tool": "search_flights", "params": {"origin": "GRU", "destination": "REC"},
        "filter": {"flights": {"$filter": "price < 600", "$sort_by": "price", "$limit": 1, "items": {"price": true}}},
        "reasoning": "cheapest"}"#;
    const REPLY: &str = "Cheapest flight costs 300.";

    struct Harness {
        orch: Orchestrator,
        llm: Arc<MockLlmClient>,
        store: Arc<InMemoryWorkspaceStore>,
    }

    fn happy_oracle() -> MockLlmClient {
        MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", PLAN_SEARCH)
            .on("TASK: reflect_on_success", REPLY)
            .on("TASK: reflect_on_failure", "Use a tool from the catalog next time.")
    }

    async fn harness_with(
        llm: MockLlmClient,
        cfg: AppConfig,
    ) -> (Harness, UnboundedReceiver<ProgressEvent>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        for action in [
            json!({"key": "book_flight", "goal": "book a flight", "slots": ["origin", "destination"]}),
            json!({"key": "book_hotel", "goal": "book a hotel", "slots": ["city"]}),
        ] {
            let action: ActionDescriptor = serde_json::from_value(action).unwrap();
            catalog.add_action("p1", &action).await;
        }
        for (key, handler) in [
            ("search_flights", "flights/search"),
            ("broken_tool", "flights"),
            ("failing_tool", "flights/fail"),
            ("ghost_tool", "flights/ghost"),
        ] {
            let tool: ToolDescriptor =
                serde_json::from_value(json!({"key": key, "handler": handler})).unwrap();
            catalog.add_tool("p1", &tool).await;
        }

        let mut handlers = HandlerRegistry::new();
        handlers.register(FnHandler::new("flights/search", "", |_| {
            Ok(json!({"flights": [{"price": 500, "id": "a"}, {"price": 300, "id": "b"}, {"price": 700, "id": "c"}]}))
        }));
        handlers.register(FnHandler::new("flights/fail", "", |_| Err("upstream 500".to_string())));

        let llm = Arc::new(llm);
        let store = Arc::new(InMemoryWorkspaceStore::new());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let orch = Orchestrator::builder(cfg)
            .with_llm(llm.clone())
            .with_store(store.clone())
            .with_catalog(catalog)
            .with_invoker(Arc::new(handlers))
            .with_resolvers(BeliefResolvers::with_today(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()))
            .with_events(tx)
            .build()
            .unwrap();
        (Harness { orch, llm, store }, rx)
    }

    async fn harness(llm: MockLlmClient) -> Harness {
        harness_with(llm, AppConfig::default()).await.0
    }

    fn request(thread: &str, message: &str) -> RunRequest {
        serde_json::from_value(json!({
            "connection_id": "conn-1",
            "portfolio": "p1",
            "entity_type": "agent",
            "entity_id": "travel",
            "thread": thread,
            "data": message
        }))
        .unwrap()
    }

    fn steps(resp: &RunResponse) -> Vec<String> {
        resp.output
            .as_array()
            .map(|trace| {
                trace
                    .iter()
                    .map(|r| r["step"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn step_output<'a>(resp: &'a RunResponse, step: &str) -> &'a Value {
        resp.output
            .as_array()
            .and_then(|trace| trace.iter().find(|r| r["step"] == json!(step)))
            .map(|r| &r["output"])
            .unwrap()
    }

    fn final_reply(resp: &RunResponse) -> String {
        step_output(resp, "finishing")["reply"].as_str().unwrap().to_string()
    }

    async fn workspace(store: &InMemoryWorkspaceStore, thread: &str) -> Workspace {
        store.list(thread).await.unwrap().pop().unwrap()
    }

    #[tokio::test]
    async fn test_full_turn_reaches_finishing() {
        let h = harness(happy_oracle()).await;
        let resp = h.orch.run(request("t1", "Find me a flight from GRU to REC")).await;

        assert!(resp.success, "{:?}", resp.output);
        assert_eq!(
            steps(&resp),
            vec![
                "classify",
                "enrich",
                "reason",
                "complete_slots",
                "form_intention",
                "execute_intention",
                "reflect_on_success",
                "finishing"
            ]
        );
        assert_eq!(step_output(&resp, "execute_intention")["output"], json!({"flights": [{"price": 300}]}));
        assert_eq!(final_reply(&resp), REPLY);

        let ws = workspace(&h.store, "t1").await;
        assert_eq!(ws.state.action, "book_flight");
        assert_eq!(ws.state.beliefs["origin"], json!("GRU"));
        assert_eq!(ws.state.intent["tool"], json!("search_flights"));
        assert_eq!(
            ws.cache["irn:tool_rs:flights/search"]["output"],
            json!({"flights": [{"price": 300}]})
        );
        assert_eq!(ws.cache["irn:tool_rs:flights/search"]["input"]["origin"], json!("GRU"));
    }

    #[tokio::test]
    async fn test_missing_slots_finish_with_prompt() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on(
                "TASK: match_slots",
                r#"{"slots": {"destination": "REC"}, "missing_slots": [], "complete": true, "human_prompt": "All good"}"#,
            );
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "I want to go to REC")).await;

        assert!(resp.success);
        assert_eq!(steps(&resp), vec!["classify", "enrich", "reason", "complete_slots", "finishing"]);
        let slots = step_output(&resp, "complete_slots");
        assert_eq!(slots["complete"], json!(false));
        assert_eq!(slots["missing_slots"], json!(["origin"]));
        assert_eq!(final_reply(&resp), "I still need: origin");

        let ws = workspace(&h.store, "t1").await;
        assert_eq!(ws.state.slots["complete"], json!(false));
    }

    #[tokio::test]
    async fn test_invalid_route_reflects_and_feeds_next_plan() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", r#"{"tool": "broken_tool", "params": {}}"#)
            .on("TASK: reflect_on_failure", "broken_tool has no handler route; use search_flights.");
        let h = harness(llm).await;

        let resp = h.orch.run(request("t1", "flight please")).await;
        assert!(resp.success);
        assert_eq!(
            steps(&resp)[4..],
            ["form_intention", "execute_intention", "reflect_on_failure", "finishing"]
        );
        assert_eq!(
            step_output(&resp, "execute_intention")["error"],
            json!("broken_tool is not a valid tool")
        );
        let ws = workspace(&h.store, "t1").await;
        assert_eq!(
            ws.cache["last_reflection"],
            json!("broken_tool has no handler route; use search_flights.")
        );

        h.orch.run(request("t1", "try again")).await;
        let last_plan_prompt = h
            .llm
            .calls()
            .into_iter()
            .filter_map(|c| c.messages.last().cloned())
            .filter(|m| m.content.starts_with("TASK: form_intention"))
            .last()
            .unwrap();
        assert!(last_plan_prompt.content.contains("use search_flights"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_plan_fault() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", r#"{"tool": "teleport"}"#)
            .on("TASK: reflect_on_failure", "No such tool.");
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "flight")).await;
        assert!(resp.success);
        assert_eq!(
            step_output(&resp, "execute_intention")["error"],
            json!("No handler found for tool 'teleport'")
        );
        assert_eq!(final_reply(&resp), "I couldn't complete that yet. No such tool.");
    }

    #[tokio::test]
    async fn test_handler_failure_ends_run() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", r#"{"tool": "failing_tool", "params": "{\"origin\": \"GRU\"}"}"#);
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "flight")).await;

        assert!(!resp.success);
        let trace = resp.output.as_array().unwrap();
        let last = trace.last().unwrap();
        assert_eq!(last["step"], json!("execute_intention"));
        assert_eq!(last["success"], json!(false));
        assert!(last["output"]["error"].as_str().unwrap().contains("upstream 500"));
    }

    #[tokio::test]
    async fn test_oracle_outage_fails_first_step() {
        let h = harness(MockLlmClient::new()).await;
        let resp = h.orch.run(request("t1", "hello")).await;
        assert!(!resp.success);
        assert_eq!(steps(&resp), vec!["classify"]);
        assert!(resp.output[0]["output"]["error"]
            .as_str()
            .unwrap()
            .starts_with("Oracle error"));
    }

    #[tokio::test]
    async fn test_undecodable_classification_falls_back() {
        let llm = MockLlmClient::new().on("TASK: classify", "Sorry, I cannot answer in JSON today.");
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "hmm")).await;

        assert!(resp.success);
        assert_eq!(steps(&resp), vec!["classify", "enrich", "reason", "finishing"]);
        assert_eq!(step_output(&resp, "classify")["perception"]["intent"], json!("unknown"));
        assert_eq!(step_output(&resp, "classify")["perception"]["raw_text"], json!("hmm"));
        assert_eq!(h.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enrich_resolves_relative_date() {
        let llm = MockLlmClient::new().on(
            "TASK: classify",
            r#"{perception: {intent: 'plan_trip', entities: {date: 'tomorrow', people: '2 friends'}, needs_tools: ["calendar", "calculator"]}, desire: 'plan a trip',}"#,
        );
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "tomorrow with 2 friends")).await;

        assert!(resp.success);
        assert_eq!(
            step_output(&resp, "enrich")["resolved"],
            json!({"date": "2026-10-15", "total_people": 3})
        );
        let ws = workspace(&h.store, "t1").await;
        assert_eq!(ws.state.beliefs["date"], json!("2026-10-15"));
        assert_eq!(ws.state.beliefs["total_people"], json!(3));
        assert_eq!(ws.state.desire, "plan a trip");
    }

    #[tokio::test]
    async fn test_confirmation_round_trip() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.confirm_before_execute = true;
        let (h, _rx) = harness_with(happy_oracle(), cfg).await;

        let first = h.orch.run(request("t1", "flight GRU to REC")).await;
        assert!(first.success);
        assert_eq!(steps(&first).last().unwrap(), "finishing");
        assert!(final_reply(&first).ends_with("Shall I go ahead?"));
        assert!(workspace(&h.store, "t1").await.awaiting_confirmation());

        let second = h.orch.run(request("t1", "Yes")).await;
        assert!(second.success, "{:?}", second.output);
        assert_eq!(
            steps(&second),
            vec!["confirm", "form_intention", "execute_intention", "reflect_on_success", "finishing"]
        );
        assert_eq!(final_reply(&second), REPLY);
        assert!(!workspace(&h.store, "t1").await.awaiting_confirmation());
    }

    #[tokio::test]
    async fn test_confirmation_declined_and_redirected() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.confirm_before_execute = true;
        let (h, _rx) = harness_with(happy_oracle(), cfg).await;

        h.orch.run(request("t1", "flight GRU to REC")).await;
        let declined = h.orch.run(request("t1", "no")).await;
        assert_eq!(steps(&declined), vec!["confirm", "finishing"]);
        assert!(!workspace(&h.store, "t1").await.awaiting_confirmation());

        h.orch.run(request("t2", "flight GRU to REC")).await;
        let redirected = h.orch.run(request("t2", "actually, what about hotels?")).await;
        assert_eq!(steps(&redirected)[..2], ["confirm", "classify"]);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let h = harness(happy_oracle()).await;
        for field in ["portfolio", "entity_type", "entity_id", "thread"] {
            let mut value = serde_json::to_value(request("t1", "hi")).unwrap();
            value[field] = json!("");
            let req: RunRequest = serde_json::from_value(value).unwrap();
            let resp = h.orch.run(req).await;
            assert!(!resp.success);
            assert_eq!(resp.output, json!(format!("No {field} provided")));
        }
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_iteration_cap_aborts_run() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.max_iterations = 3;
        let (h, _rx) = harness_with(happy_oracle(), cfg).await;
        let resp = h.orch.run(request("t1", "flight")).await;

        assert!(!resp.success);
        assert_eq!(resp.output, json!("Iteration budget exceeded: more than 3 steps"));
        let trace = resp.trace.as_ref().and_then(Value::as_array).unwrap();
        let done: Vec<&str> = trace.iter().map(|r| r["step"].as_str().unwrap()).collect();
        assert_eq!(done, vec!["classify", "enrich", "reason"]);
        assert_eq!(serde_json::to_value(&resp).unwrap()["trace"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_completed_runs_carry_no_trace_field() {
        let h = harness(happy_oracle()).await;
        let resp = h.orch.run(request("t1", "flight")).await;
        assert!(resp.trace.is_none());
        assert!(serde_json::to_value(&resp).unwrap().get("trace").is_none());
    }

    #[tokio::test]
    async fn test_conservative_action_across_turns() {
        let llm = MockLlmClient::new()
            .on(
                "Message: hotel too",
                r#"{"desire": "also a hotel", "action_match": {"confidence": 99, "action": "book_flight_v2", "action_changed": false}}"#,
            )
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on(
                "TASK: match_slots",
                r#"{"slots": {"origin": "GRU"}, "missing_slots": ["destination"], "complete": false, "human_prompt": "Where to (destination)?"}"#,
            );
        let h = harness(llm).await;
        h.orch.run(request("t1", "flight")).await;
        let resp = h.orch.run(request("t1", "hotel too")).await;

        assert_eq!(step_output(&resp, "reason")["action"], json!("book_flight"));
        assert_eq!(step_output(&resp, "reason")["action_changed"], json!(false));
        assert_eq!(workspace(&h.store, "t1").await.state.action, "book_flight");
    }

    fn switch_to_hotel(confidence: u32) -> MockLlmClient {
        let classify = json!({
            "desire": "a hotel instead",
            "action_match": {
                "confidence": confidence,
                "action": "book_hotel",
                "action_changed": true,
                "change_reason": "user asked for a hotel"
            }
        });
        MockLlmClient::new()
            .on("Message: hotel instead", classify.to_string())
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on(
                "TASK: match_slots",
                r#"{"slots": {"origin": "GRU"}, "missing_slots": ["destination"], "complete": false, "human_prompt": "Where to (destination)?"}"#,
            )
    }

    #[tokio::test]
    async fn test_catalog_action_change_above_threshold() {
        let h = harness(switch_to_hotel(85)).await;
        h.orch.run(request("t1", "flight")).await;
        assert_eq!(workspace(&h.store, "t1").await.state.action, "book_flight");

        let resp = h.orch.run(request("t1", "hotel instead")).await;
        assert_eq!(step_output(&resp, "reason")["action"], json!("book_hotel"));
        assert_eq!(step_output(&resp, "reason")["action_changed"], json!(true));
        assert_eq!(workspace(&h.store, "t1").await.state.action, "book_hotel");
        assert_eq!(step_output(&resp, "complete_slots")["missing_slots"], json!(["city"]));
    }

    #[tokio::test]
    async fn test_catalog_action_change_below_threshold_is_kept() {
        let h = harness(switch_to_hotel(70)).await;
        h.orch.run(request("t1", "flight")).await;

        let resp = h.orch.run(request("t1", "hotel instead")).await;
        assert_eq!(step_output(&resp, "reason")["action"], json!("book_flight"));
        assert_eq!(step_output(&resp, "reason")["action_changed"], json!(false));
        assert_eq!(workspace(&h.store, "t1").await.state.action, "book_flight");
    }

    #[tokio::test]
    async fn test_undecodable_string_params_reflect() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", r#"{"tool": "search_flights", "params": "origin is GRU"}"#)
            .on("TASK: reflect_on_failure", "Send params as an object.");
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "flight")).await;

        assert!(resp.success, "{:?}", resp.output);
        assert_eq!(
            steps(&resp)[4..],
            ["form_intention", "execute_intention", "reflect_on_failure", "finishing"]
        );
        assert_eq!(
            step_output(&resp, "execute_intention")["error"],
            json!("Invalid tool parameters: origin is GRU")
        );
        assert_eq!(final_reply(&resp), "I couldn't complete that yet. Send params as an object.");
    }

    #[tokio::test]
    async fn test_double_escaped_params_execute() {
        let escaped = json!(json!({"origin": "GRU", "destination": "REC"}).to_string()).to_string();
        let plan = json!({"tool": "search_flights", "params": escaped});
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", plan.to_string())
            .on("TASK: reflect_on_success", REPLY);
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "flight")).await;

        assert!(resp.success, "{:?}", resp.output);
        assert_eq!(final_reply(&resp), REPLY);
        let ws = workspace(&h.store, "t1").await;
        assert_eq!(ws.cache["irn:tool_rs:flights/search"]["input"]["origin"], json!("GRU"));
        assert_eq!(ws.cache["irn:tool_rs:flights/search"]["input"]["destination"], json!("REC"));
    }

    #[tokio::test]
    async fn test_unregistered_handler_route_reflects() {
        let llm = MockLlmClient::new()
            .on("TASK: classify", CLASSIFY_FLIGHT)
            .on("TASK: match_slots", SLOTS_COMPLETE)
            .on("TASK: form_intention", r#"{"tool": "ghost_tool", "params": {}}"#)
            .on("TASK: reflect_on_failure", "ghost_tool is not deployed.");
        let h = harness(llm).await;
        let resp = h.orch.run(request("t1", "flight")).await;

        assert!(resp.success, "{:?}", resp.output);
        assert_eq!(steps(&resp).last().unwrap(), "finishing");
        assert!(steps(&resp).contains(&"reflect_on_failure".to_string()));
        assert_eq!(
            step_output(&resp, "execute_intention")["error"],
            json!("No handler registered at route 'flights/ghost'")
        );
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (h, mut rx) = harness_with(happy_oracle(), AppConfig::default()).await;
        h.orch.run(request("t1", "flight")).await;

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.connection_id.as_deref(), Some("conn-1"));
            events.push(ev.event);
        }
        assert!(matches!(events.first(), Some(AgentEvent::StepStarted { iteration: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ToolCall { tool, .. } if tool == "search_flights")));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Reply { text } if text == REPLY)));
    }
}
