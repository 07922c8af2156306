//! Orchestrator：单轮对话的步骤状态机
//!
//! 每次 run：校验请求 -> 加载目录 -> 取/建 workspace -> 选择入口步骤 -> Dispatcher 驱动各步骤。
//!
//! | 步骤 | 作用 | 下一步 |
//! |---|---|---|
//! | confirm | 解释用户对 follow_up 的回答 | form_intention / finishing / classify |
//! | classify | 一次 Oracle 调用完成感知与动作匹配，记录信念历史 | enrich |
//! | enrich | 信念解析器补全 | reason |
//! | reason | 写入事实与意愿，保守地选择动作 | complete_slots / finishing |
//! | complete_slots | 槽位匹配 | form_intention / finishing |
//! | form_intention | Oracle 规划 `{tool, params, filter}` | execute_intention |
//! | execute_intention | 调用工具并投影结果，写缓存 | reflect_on_success / reflect_on_failure |
//! | reflect_on_* | Oracle 组织回复或分析失败 | finishing |
//! | finishing | 输出最终回复 | - |
//!
//! 协作方错误（存储、目录、Oracle、工具调用）使本步 success:false 并结束本轮；
//! 计划错误转入 reflect_on_failure；守卫错误中止整轮。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::catalog::{load_actions, load_tools, Catalog};
use crate::config::AppConfig;
use crate::core::{
    AgentError, AgentEvent, DispatchOutcome, Dispatcher, EventSink, Plan, ProgressEvent,
    RecoveryAction, RecoveryEngine, RequestContext, RunRequest, RunResponse, Step, StepResult,
    StepRunner,
};
use crate::decoder;
use crate::llm::{clear_stale_tool_content, prompts, CompletionOptions, LlmClient, Message, Role};
use crate::perception::Classification;
use crate::slots::{select_action, SlotMatcher, SlotReport};
use crate::tools::{BeliefResolvers, HandlerInvoker, ToolExecutor};
use crate::workspace::{prune_history, FollowUp, Workspace, WorkspaceChange, WorkspaceMutator, WorkspaceStore};

const TOOL_CACHE_PREFIX: &str = "irn:tool_rs:";
const LAST_REFLECTION: &str = "last_reflection";

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm", "go ahead", "do it", "please do",
];
const NEGATIVE: &[&str] = &["no", "n", "nope", "cancel", "stop", "don't", "do not", "abort"];

/// 对 follow_up 的回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAnswer {
    Affirmative,
    Negative,
    /// 不是回答，当作新消息处理
    Other,
}

/// 回答解释：先比对 follow_up.options（第一个为肯定、第二个为否定），再比对常见词
pub fn interpret_answer(message: &str, options: &[String]) -> ConfirmAnswer {
    let answer = message
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    let matches_option = |i: usize| {
        options
            .get(i)
            .map(|o| o.trim().eq_ignore_ascii_case(&answer))
            .unwrap_or(false)
    };
    if matches_option(0) || AFFIRMATIVE.contains(&answer.as_str()) {
        ConfirmAnswer::Affirmative
    } else if matches_option(1) || NEGATIVE.contains(&answer.as_str()) {
        ConfirmAnswer::Negative
    } else {
        ConfirmAnswer::Other
    }
}

/// Orchestrator 构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn WorkspaceStore>>,
    catalog: Option<Arc<dyn Catalog>>,
    invoker: Option<Arc<dyn HandlerInvoker>>,
    resolvers: BeliefResolvers,
    events: Option<UnboundedSender<ProgressEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
            catalog: None,
            invoker: None,
            resolvers: BeliefResolvers::default(),
            events: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn WorkspaceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn HandlerInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// 固定 enrich 步骤使用的「今天」等解析参数
    pub fn with_resolvers(mut self, resolvers: BeliefResolvers) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let missing = |what: &str| AgentError::ConfigError(format!("Orchestrator requires {what}"));
        let llm = self.llm.ok_or_else(|| missing("an oracle client"))?;
        let store = self.store.ok_or_else(|| missing("a workspace store"))?;
        let catalog = self.catalog.ok_or_else(|| missing("a catalog"))?;
        let invoker = self.invoker.ok_or_else(|| missing("a handler invoker"))?;

        let cfg = self.config;
        let options = CompletionOptions::new(cfg.llm.model.clone(), cfg.llm.temperature);
        let reflection_options =
            CompletionOptions::new(cfg.llm.reflection_model.clone(), cfg.llm.reflection_temperature);

        Ok(Orchestrator {
            slots: SlotMatcher::new(llm.clone(), options.clone(), cfg.llm.timeouts.request),
            executor: ToolExecutor::new(invoker, cfg.tools.tool_timeout_secs)
                .with_preview_chars(cfg.tools.args_preview_chars),
            mutator: WorkspaceMutator::new(store),
            dispatcher: Dispatcher::new(cfg.orchestrator.max_iterations),
            recovery: RecoveryEngine::new(),
            events: EventSink::new(self.events),
            resolvers: self.resolvers,
            llm,
            catalog,
            options,
            reflection_options,
            config: cfg,
        })
    }
}

/// 对话编排器；每次 run 都新建 RequestContext，不跨轮共享状态
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn Catalog>,
    mutator: WorkspaceMutator,
    slots: SlotMatcher,
    executor: ToolExecutor,
    resolvers: BeliefResolvers,
    recovery: RecoveryEngine,
    dispatcher: Dispatcher,
    events: EventSink,
    options: CompletionOptions,
    reflection_options: CompletionOptions,
    config: AppConfig,
}

impl Orchestrator {
    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// 入口：返回 `{success, output: [step trace]}` 或 `{success:false, output: 错误文本}`
    pub async fn run(&self, request: RunRequest) -> RunResponse {
        let mut ctx = match RequestContext::from_request(&request, &self.config.orchestrator.default_org) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "run request rejected");
                return RunResponse::error(e.to_string());
            }
        };

        match self.prepare(&mut ctx).await {
            Ok(workspace) => self.drive(ctx, workspace).await,
            Err(e) => {
                tracing::warn!(error = %e, thread = %ctx.thread, "run setup failed");
                self.events.emit(
                    ctx.connection_id.as_deref(),
                    AgentEvent::Fault { kind: "collaborator".into(), text: e.to_string() },
                );
                RunResponse::error(e.to_string())
            }
        }
    }

    /// 加载目录与 workspace，并把 workspace 的当前状态带入上下文
    async fn prepare(&self, ctx: &mut RequestContext) -> Result<Workspace, AgentError> {
        let cat = &self.config.catalog;
        ctx.actions = load_actions(self.catalog.as_ref(), &ctx.portfolio, &ctx.org, &cat.action_prefix).await?;
        ctx.tools = load_tools(self.catalog.as_ref(), &ctx.portfolio, &ctx.org, &cat.tool_prefix).await?;

        let ws = self.mutator.resolve(ctx.workspace_ref()).await?;
        ctx.workspace_id = Some(ws.id.clone());
        ctx.beliefs = ws.state.beliefs.clone();
        ctx.desire = ws.state.desire.clone();
        ctx.action = ws.state.action.clone();
        ctx.last_reflection = ws
            .cache
            .get(LAST_REFLECTION)
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(String::from);
        tracing::debug!(
            workspace = %ws.id,
            actions = ctx.actions.len(),
            tools = ctx.tools.len(),
            "run prepared"
        );
        Ok(ws)
    }

    async fn drive(&self, ctx: RequestContext, workspace: Workspace) -> RunResponse {
        let start = if workspace.awaiting_confirmation() {
            Step::Confirm
        } else {
            Step::Classify
        };
        let connection_id = ctx.connection_id.clone();
        let mut run = StepRun {
            orch: self,
            ctx,
            ws: workspace,
            resolved: Vec::new(),
        };

        match self.dispatcher.drive(start, &mut run).await {
            Ok(DispatchOutcome::Finished(trace)) => RunResponse::new(true, trace_json(&trace)),
            Ok(DispatchOutcome::StepFailed(trace)) => RunResponse::new(false, trace_json(&trace)),
            Err(trip) => {
                self.events.emit(
                    connection_id.as_deref(),
                    AgentEvent::Fault { kind: "guard".into(), text: trip.error.to_string() },
                );
                tracing::warn!(error = %trip.error, steps = trip.trace.len(), "run aborted by guard");
                RunResponse::error(trip.error.to_string()).with_trace(trace_json(&trip.trace))
            }
        }
    }

    /// 单次 Oracle 调用，带请求超时
    async fn oracle(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, AgentError> {
        let secs = self.config.llm.timeouts.request;
        match tokio::time::timeout(Duration::from_secs(secs), self.llm.complete(messages, options)).await {
            Ok(Ok(text)) => {
                tracing::debug!(model = %options.model, chars = text.len(), "oracle replied");
                Ok(text)
            }
            Ok(Err(e)) => Err(AgentError::Oracle(e)),
            Err(_) => Err(AgentError::Oracle(format!("request timed out after {secs}s"))),
        }
    }
}

fn trace_json(trace: &[StepResult]) -> Value {
    serde_json::to_value(trace).unwrap_or(Value::Null)
}

fn to_map<T: serde::Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(m)) => m,
        _ => Map::new(),
    }
}

/// 一轮运行的可变状态；实现 StepRunner 供 Dispatcher 驱动
struct StepRun<'a> {
    orch: &'a Orchestrator,
    ctx: RequestContext,
    ws: Workspace,
    /// enrich 解析出的信念，reason 写入时优先于原始实体
    resolved: Vec<(String, Value)>,
}

#[async_trait]
impl<'a> StepRunner for StepRun<'a> {
    async fn run_step(&mut self, step: Step, iteration: usize) -> Result<StepResult, AgentError> {
        let conn = self.ctx.connection_id.clone();
        self.orch
            .events
            .emit(conn.as_deref(), AgentEvent::StepStarted { step, iteration });

        let outcome = match step {
            Step::Confirm => self.confirm().await,
            Step::Classify => self.classify().await,
            Step::Enrich => self.enrich().await,
            Step::Reason => self.reason().await,
            Step::CompleteSlots => self.complete_slots().await,
            Step::FormIntention => self.form_intention().await,
            Step::ExecuteIntention => self.execute_intention().await,
            Step::ReflectOnSuccess => self.reflect_on_success().await,
            Step::ReflectOnFailure => self.reflect_on_failure().await,
            Step::Finishing => Ok(self.finishing()),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let action = self.orch.recovery.handle(&e);
                tracing::warn!(step = %step, error = %e, recovery = ?action, "step fault");
                self.orch.events.emit(
                    conn.as_deref(),
                    AgentEvent::Fault { kind: format!("{:?}", e.kind()).to_lowercase(), text: e.to_string() },
                );
                match action {
                    RecoveryAction::Abort => return Err(e),
                    RecoveryAction::Reflect(msg) => {
                        self.ctx.last_error = Some(msg.clone());
                        StepResult::advance(step, Step::ReflectOnFailure, json!({"error": msg}))
                    }
                    RecoveryAction::FailStep(msg) => StepResult::failed(step, json!({"error": msg})),
                    RecoveryAction::FallbackToDefault => {
                        StepResult::failed(step, json!({"error": e.to_string()}))
                    }
                }
            }
        };

        self.orch.events.emit(
            conn.as_deref(),
            AgentEvent::StepFinished { step, success: result.success },
        );
        Ok(result)
    }
}

impl StepRun<'_> {
    /// 写回 workspace 并同步上下文中的信念视图
    async fn commit(&mut self, changes: Vec<WorkspaceChange>) -> Result<(), AgentError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.ws = self.orch.mutator.mutate(self.ctx.workspace_ref(), &changes).await?;
        self.ctx.beliefs = self.ws.state.beliefs.clone();
        self.ctx.desire = self.ws.state.desire.clone();
        self.ctx.action = self.ws.state.action.clone();
        Ok(())
    }

    async fn confirm(&mut self) -> Result<StepResult, AgentError> {
        let follow_up = self.ws.state.follow_up.clone().unwrap_or_default();
        let answer = interpret_answer(&self.ctx.message, &follow_up.options);
        self.commit(vec![WorkspaceChange::FollowUp(None)]).await?;

        let next = match answer {
            ConfirmAnswer::Affirmative => Step::from_name(&follow_up.callback).unwrap_or(Step::FormIntention),
            ConfirmAnswer::Negative => {
                self.ctx.reply = Some("Okay, I won't go ahead with that.".to_string());
                Step::Finishing
            }
            ConfirmAnswer::Other => Step::Classify,
        };
        tracing::info!(answer = ?answer, next = %next, "follow-up answered");
        Ok(StepResult::advance(
            Step::Confirm,
            next,
            json!({"answer": format!("{answer:?}").to_lowercase(), "callback": follow_up.callback}),
        ))
    }

    async fn classify(&mut self) -> Result<StepResult, AgentError> {
        let history = prune_history(&self.ws.state.history);
        let messages = prompts::classify(
            &self.ctx.message,
            &self.ctx.beliefs,
            &history,
            &self.ctx.action,
            &self.ctx.actions,
        );
        let text = self.orch.oracle(&messages, &self.orch.options).await?;

        let classification = match decoder::decode_as::<Classification>(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "classification undecodable, using default perception");
                Classification::fallback(&self.ctx.message)
            }
        };

        let entries = classification.history_entries();
        if !entries.is_empty() {
            self.commit(vec![WorkspaceChange::BeliefHistory(entries)]).await?;
        }
        let output = json!({
            "perception": classification.perception,
            "desire": classification.desire,
            "action_match": classification.action_match,
        });
        self.ctx.classification = Some(classification);
        Ok(StepResult::advance(Step::Classify, Step::Enrich, output))
    }

    async fn enrich(&mut self) -> Result<StepResult, AgentError> {
        let (needs_tools, entities) = match &self.ctx.classification {
            Some(c) => (c.perception.needs_tools.clone(), c.perception.entities.clone()),
            None => (Vec::new(), Map::new()),
        };
        self.resolved = self.orch.resolvers.resolve(&needs_tools, &entities);
        if !self.resolved.is_empty() {
            self.commit(vec![WorkspaceChange::BeliefHistory(self.resolved.clone())]).await?;
        }
        let resolved: Map<String, Value> = self.resolved.iter().cloned().collect();
        Ok(StepResult::advance(Step::Enrich, Step::Reason, json!({"resolved": resolved})))
    }

    async fn reason(&mut self) -> Result<StepResult, AgentError> {
        let classification = self.ctx.classification.clone().unwrap_or_default();

        let mut beliefs = classification.perception.entities.clone();
        beliefs.extend(classification.processed_info.normalized_values.clone());
        beliefs.extend(classification.facts.clone());
        beliefs.extend(self.resolved.iter().cloned());

        let decision = select_action(
            &self.ctx.action,
            &classification.action_match,
            &self.ctx.actions,
            self.orch.config.orchestrator.min_action_confidence,
            self.orch.config.orchestrator.action_change_confidence,
        );
        if decision.changed {
            tracing::info!(from = %self.ctx.action, to = %decision.action, reason = %decision.reason, "action selected");
        }

        let mut changes = Vec::new();
        if !beliefs.is_empty() {
            changes.push(WorkspaceChange::Belief(beliefs));
        }
        if !classification.desire.is_empty() {
            changes.push(WorkspaceChange::Desire(classification.desire.clone()));
        }
        if decision.changed {
            changes.push(WorkspaceChange::Action(decision.action.clone()));
        }
        self.commit(changes).await?;

        let output = json!({
            "desire": self.ctx.desire,
            "action": self.ctx.action,
            "action_changed": decision.changed,
            "reason": decision.reason,
        });
        if self.ctx.action_descriptor().is_none() {
            self.ctx.reply = Some(if self.ctx.desire.is_empty() {
                "Could you tell me a bit more about what you'd like to do?".to_string()
            } else {
                format!(
                    "I understand you want to {}, but I don't have an action for that yet.",
                    self.ctx.desire
                )
            });
            return Ok(StepResult::advance(Step::Reason, Step::Finishing, output));
        }
        Ok(StepResult::advance(Step::Reason, Step::CompleteSlots, output))
    }

    async fn complete_slots(&mut self) -> Result<StepResult, AgentError> {
        let Some(action) = self.ctx.action_descriptor().cloned() else {
            return Err(AgentError::Catalog(format!("action '{}' is not in the catalog", self.ctx.action)));
        };
        let history = prune_history(&self.ws.state.history);
        let report = self
            .orch
            .slots
            .match_slots(&action, &self.ctx.beliefs, &history)
            .await?;

        let mut changes = vec![WorkspaceChange::Slots(to_map(&report))];
        let next = if !report.complete {
            self.ctx.reply = Some(report.human_prompt.clone());
            Step::Finishing
        } else if self.orch.config.orchestrator.confirm_before_execute {
            let prompt = format!(
                "I have everything I need to {}: {}. Shall I go ahead?",
                if action.goal.is_empty() { &action.key } else { &action.goal },
                crate::llm::string_from_object(&report.slots)
            );
            changes.push(WorkspaceChange::FollowUp(Some(FollowUp {
                expected: true,
                callback: Step::FormIntention.as_str().to_string(),
                options: vec!["yes".to_string(), "no".to_string()],
                prompt: prompt.clone(),
            })));
            self.ctx.reply = Some(prompt);
            Step::Finishing
        } else {
            Step::FormIntention
        };
        self.commit(changes).await?;

        let output = serde_json::to_value(&report).unwrap_or(Value::Null);
        self.ctx.slot_report = Some(report);
        Ok(StepResult::advance(Step::CompleteSlots, next, output))
    }

    /// 先前几轮缓存的工具结果，作为 tool 消息送入规划
    fn cached_tool_messages(&self) -> Vec<Message> {
        self.ws
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(TOOL_CACHE_PREFIX))
            .map(|(k, v)| Message::tool(format!("{}: {}", &k[TOOL_CACHE_PREFIX.len()..], v)))
            .collect()
    }

    async fn form_intention(&mut self) -> Result<StepResult, AgentError> {
        let slots = match &self.ctx.slot_report {
            Some(report) => report.slots.clone(),
            None => serde_json::from_value::<SlotReport>(Value::Object(self.ws.state.slots.clone()))
                .map(|r| r.slots)
                .unwrap_or_default(),
        };
        let prompt = prompts::form_intention(
            &self.ctx.desire,
            &slots,
            &self.ctx.tools,
            self.ctx.last_reflection.as_deref(),
        );

        let mut messages = Vec::with_capacity(prompt.len() + 4);
        messages.extend(prompt.iter().filter(|m| m.role == Role::System).cloned());
        messages.extend(self.cached_tool_messages());
        messages.extend(prompt.into_iter().filter(|m| m.role != Role::System));
        clear_stale_tool_content(&mut messages, self.orch.config.orchestrator.recent_tool_messages);

        let text = self.orch.oracle(&messages, &self.orch.options).await?;
        let plan = match decoder::decode_as::<Plan>(&text) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "plan undecodable, reflecting");
                let msg = format!("Plan could not be decoded: {}", e.reason);
                self.ctx.last_error = Some(msg.clone());
                return Ok(StepResult::advance(
                    Step::FormIntention,
                    Step::ReflectOnFailure,
                    json!({"error": msg, "raw": e.original}),
                ));
            }
        };

        self.commit(vec![WorkspaceChange::Intent(plan.to_map())]).await?;
        let output = serde_json::to_value(&plan).unwrap_or(Value::Null);
        tracing::info!(tool = %plan.tool, reasoning = %plan.reasoning, "intention formed");
        self.ctx.plan = Some(plan);
        Ok(StepResult::advance(Step::FormIntention, Step::ExecuteIntention, output))
    }

    async fn execute_intention(&mut self) -> Result<StepResult, AgentError> {
        let plan = self.ctx.plan.clone().ok_or(AgentError::EmptyPlan)?;
        self.orch.events.emit(
            self.ctx.connection_id.as_deref(),
            AgentEvent::ToolCall { tool: plan.tool.clone(), args: plan.params.clone() },
        );

        let outcome = self.orch.executor.execute(&self.ctx, &plan).await?;

        let mut cache = Map::new();
        cache.insert(
            outcome.cache_key(),
            json!({"input": outcome.input, "output": outcome.output}),
        );
        self.commit(vec![WorkspaceChange::Cache(cache)]).await?;

        let output = serde_json::to_value(&outcome).unwrap_or(Value::Null);
        self.ctx.last_result = Some(outcome);
        Ok(StepResult::advance(Step::ExecuteIntention, Step::ReflectOnSuccess, output))
    }

    async fn reflect_on_success(&mut self) -> Result<StepResult, AgentError> {
        let (tool, output) = match &self.ctx.last_result {
            Some(r) => (r.action.clone(), r.output.clone()),
            None => (String::new(), Value::Null),
        };
        let messages = prompts::reflect_on_success(&self.ctx.desire, &tool, &output);
        let text = self.orch.oracle(&messages, &self.orch.reflection_options).await?;
        let reply = text.trim().to_string();

        if self.ctx.last_reflection.is_some() {
            let mut cache = Map::new();
            cache.insert(LAST_REFLECTION.to_string(), Value::Null);
            self.commit(vec![WorkspaceChange::Cache(cache)]).await?;
            self.ctx.last_reflection = None;
        }
        self.ctx.reply = Some(reply.clone());
        Ok(StepResult::advance(Step::ReflectOnSuccess, Step::Finishing, json!({"reply": reply})))
    }

    async fn reflect_on_failure(&mut self) -> Result<StepResult, AgentError> {
        let plan = self
            .ctx
            .plan
            .as_ref()
            .and_then(|p| serde_json::to_value(p).ok())
            .unwrap_or(Value::Null);
        let error = self.ctx.last_error.clone().unwrap_or_else(|| "unknown error".to_string());
        let messages = prompts::reflect_on_failure(&self.ctx.desire, &plan, &error);
        let text = self.orch.oracle(&messages, &self.orch.reflection_options).await?;
        let reflection = text.trim().to_string();

        let mut cache = Map::new();
        cache.insert(LAST_REFLECTION.to_string(), Value::String(reflection.clone()));
        self.commit(vec![WorkspaceChange::Cache(cache)]).await?;

        self.ctx.last_reflection = Some(reflection.clone());
        self.ctx.reply = Some(format!("I couldn't complete that yet. {reflection}"));
        Ok(StepResult::advance(
            Step::ReflectOnFailure,
            Step::Finishing,
            json!({"error": error, "reflection": reflection}),
        ))
    }

    fn finishing(&mut self) -> StepResult {
        let reply = self.ctx.reply.clone().unwrap_or_else(|| "Done.".to_string());
        self.orch.events.emit(
            self.ctx.connection_id.as_deref(),
            AgentEvent::Reply { text: reply.clone() },
        );
        StepResult::finish(Step::Finishing, json!({"reply": reply}))
    }
}
