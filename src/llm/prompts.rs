//! Prompt 构建
//!
//! 每个需要 Oracle 的步骤一个构建函数，返回 `[system, user]` 两条消息。
//! user 消息第一行固定为 `TASK: <name>`，便于 Mock 按任务脚本化应答。

use schemars::schema_for;
use serde_json::{json, Map, Value};

use crate::catalog::{ActionDescriptor, ToolDescriptor};
use crate::core::Plan;
use crate::llm::{string_from_object, Message};
use crate::workspace::BeliefEvent;

const SYSTEM: &str = "You are a task-completion agent. You track the user's beliefs, infer their goal, \
and pick catalog actions and tools to reach it. Respond with a single JSON object unless told otherwise.";

pub const TASK_CLASSIFY: &str = "TASK: classify";
pub const TASK_SLOTS: &str = "TASK: match_slots";
pub const TASK_INTENTION: &str = "TASK: form_intention";
pub const TASK_REFLECT_SUCCESS: &str = "TASK: reflect_on_success";
pub const TASK_REFLECT_FAILURE: &str = "TASK: reflect_on_failure";

/// 规划输出的 JSON Schema，拼入规划 prompt 以减少格式错误
pub fn plan_schema_json() -> String {
    let schema = schema_for!(Plan);
    serde_json::to_string(&schema).unwrap_or_default()
}

fn pair(user: String) -> Vec<Message> {
    vec![Message::system(SYSTEM), Message::user(user)]
}

fn history_lines(history: &[BeliefEvent]) -> String {
    if history.is_empty() {
        return "(none)".to_string();
    }
    history
        .iter()
        .map(|ev| format!("- {} = {}", ev.key, ev.val))
        .collect::<Vec<_>>()
        .join("\n")
}

fn action_lines(actions: &[ActionDescriptor]) -> String {
    if actions.is_empty() {
        return "(none)".to_string();
    }
    actions
        .iter()
        .map(|a| {
            format!(
                "- {}: {} (slots: {}; e.g. {})",
                a.key,
                a.goal,
                a.slots.join(", "),
                a.utterances.join(" | ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 分类：感知、信息加工、事实抽取、意愿识别与动作匹配合并为一次调用
pub fn classify(
    message: &str,
    beliefs: &Map<String, Value>,
    history: &[BeliefEvent],
    current_action: &str,
    actions: &[ActionDescriptor],
) -> Vec<Message> {
    let shape = json!({
        "perception": {"intent": "", "entities": {}, "raw_text": "", "needs_tools": []},
        "processed_info": {"enriched_entities": {}, "missing_beliefs": [], "normalized_values": {}},
        "facts": {},
        "desire": "",
        "action_match": {"confidence": 0, "action": "", "reasoning": "", "action_changed": false, "change_reason": ""},
        "belief_history_updates": [{"type": "belief", "key": "", "val": "", "time": ""}]
    });
    pair(format!(
        "{TASK_CLASSIFY}\n\
         1. Perception: extract the intent and the entities literally mentioned in the message. \
         List any of calendar, calculator, web_search in needs_tools when an entity needs resolving.\n\
         2. Processing: normalise values and list beliefs that are still missing.\n\
         3. Facts: merge the known beliefs with the new entities.\n\
         4. Desire: one sentence describing what the user wants.\n\
         5. Action: pick the catalog action that serves the desire, with a confidence from 0 to 100. \
         Keep the current action unless the message explicitly asks for something different; \
         set action_changed and change_reason only then.\n\n\
         Message: {message}\n\
         Known beliefs: {beliefs}\n\
         Belief history:\n{history}\n\
         Current action: {current}\n\
         Catalog actions:\n{actions}\n\n\
         Output shape:\n{shape}",
        beliefs = string_from_object(beliefs),
        history = history_lines(history),
        current = if current_action.is_empty() { "(none)" } else { current_action },
        actions = action_lines(actions),
    ))
}

/// 槽位匹配：语义匹配（同义、复数、复合词）由 Oracle 完成
pub fn match_slots(
    action: &ActionDescriptor,
    beliefs: &Map<String, Value>,
    history: &[BeliefEvent],
) -> Vec<Message> {
    pair(format!(
        "{TASK_SLOTS}\n\
         Action: {key} ({goal})\n\
         Required slots: {slots}\n\
         Known beliefs: {beliefs}\n\
         Belief history (latest per key):\n{history}\n\n\
         Fill each required slot from the beliefs. Treat synonyms, plurals and compound names as matches. \
         Never invent values. If any slot is missing, human_prompt must ask for it.\n\
         Output shape:\n\
         {{\"slots\": {{}}, \"missing_slots\": [], \"complete\": false, \"human_prompt\": \"\"}}",
        key = action.key,
        goal = action.goal,
        slots = action.slots.join(", "),
        beliefs = string_from_object(beliefs),
        history = history_lines(history),
    ))
}

/// 规划：选择一个工具、参数与输出投影
pub fn form_intention(
    desire: &str,
    slots: &Map<String, Value>,
    tools: &[ToolDescriptor],
    last_reflection: Option<&str>,
) -> Vec<Message> {
    let tool_lines = if tools.is_empty() {
        "(none)".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {} params={}", t.key, t.description, t.parameters))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let mut prompt = format!(
        "{TASK_INTENTION}\n\
         Desire: {desire}\n\
         Slots: {slots}\n\
         Tools:\n{tool_lines}\n\n\
         Choose exactly one tool. Optionally add a filter projection to trim its output \
         (true keeps a field, \"*\" keeps all, \"!field\" excludes; lists accept $filter like \"price < 600\", \
         $sort_by, $reverse, $min, $max, $limit and items).\n\
         Output JSON schema:\n{schema}",
        slots = string_from_object(slots),
        schema = plan_schema_json(),
    );
    if let Some(reflection) = last_reflection.filter(|r| !r.is_empty()) {
        prompt.push_str(&format!("\n\nThe previous attempt failed. Reflection:\n{reflection}"));
    }
    pair(prompt)
}

/// 成功反思：把工具结果组织成给用户的回复（纯文本）
pub fn reflect_on_success(desire: &str, tool: &str, output: &Value) -> Vec<Message> {
    pair(format!(
        "{TASK_REFLECT_SUCCESS}\n\
         Desire: {desire}\n\
         Tool: {tool}\n\
         Result: {output}\n\n\
         Reply to the user in plain text, summarising the result against the desire."
    ))
}

/// 失败反思：分析失败原因并给出下次的修正建议（纯文本）
pub fn reflect_on_failure(desire: &str, plan: &Value, error: &str) -> Vec<Message> {
    pair(format!(
        "{TASK_REFLECT_FAILURE}\n\
         Desire: {desire}\n\
         Plan: {plan}\n\
         Error: {error}\n\n\
         Explain briefly what went wrong and what the next plan should do differently. Plain text."
    ))
}
