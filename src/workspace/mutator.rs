//! Workspace 变更：按 key 的类型化合并规则，然后整文档写回
//!
//! | key | 规则 |
//! |---|---|
//! | belief | 浅合并进 beliefs |
//! | belief_history | 每项追加一条 BeliefEvent |
//! | desire / action | 覆盖字符串 |
//! | intent / slots | 覆盖 map |
//! | follow_up | 覆盖描述（null 清除） |
//! | is_active | 覆盖布尔 |
//! | cache | 条目合并进 cache |
//!
//! 未知 key 忽略。同一线程的变更通过线程级互斥串行化。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::model::{BeliefEvent, BeliefMap, FollowUp, Workspace};
use super::store::{StoreError, WorkspaceStore};

/// 一条类型化变更
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceChange {
    Belief(BeliefMap),
    /// 按顺序追加的 (key, val)
    BeliefHistory(Vec<(String, Value)>),
    Desire(String),
    Action(String),
    Intent(Map<String, Value>),
    Slots(Map<String, Value>),
    FollowUp(Option<FollowUp>),
    IsActive(bool),
    Cache(Map<String, Value>),
}

impl WorkspaceChange {
    /// 把 JSON 形式的「命名变更表」转为类型化变更；未知 key 与类型不符的值被丢弃
    pub fn from_named(changes: &Map<String, Value>) -> Vec<WorkspaceChange> {
        let mut out = Vec::new();
        for (key, value) in changes {
            let change = match (key.as_str(), value) {
                ("belief", Value::Object(m)) => Some(Self::Belief(m.clone())),
                ("belief_history", Value::Object(m)) => Some(Self::BeliefHistory(
                    m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                )),
                ("desire", Value::String(s)) => Some(Self::Desire(s.clone())),
                ("action", Value::String(s)) => Some(Self::Action(s.clone())),
                ("intent", Value::Object(m)) => Some(Self::Intent(m.clone())),
                ("slots", Value::Object(m)) => Some(Self::Slots(m.clone())),
                ("follow_up", Value::Null) => Some(Self::FollowUp(None)),
                ("follow_up", v @ Value::Object(_)) => {
                    serde_json::from_value::<FollowUp>(v.clone()).ok().map(|f| Self::FollowUp(Some(f)))
                }
                ("is_active", Value::Bool(b)) => Some(Self::IsActive(*b)),
                ("cache", Value::Object(m)) => Some(Self::Cache(m.clone())),
                (
                    "belief" | "belief_history" | "desire" | "action" | "intent" | "slots"
                    | "follow_up" | "is_active" | "cache",
                    _,
                ) => {
                    tracing::warn!(key = %key, "workspace change has wrong value type, ignored");
                    None
                }
                _ => {
                    tracing::debug!(key = %key, "unknown workspace change key, ignored");
                    None
                }
            };
            out.extend(change);
        }
        out
    }
}

/// 在内存中应用变更；`now` 由调用方给出，便于测试
pub fn apply_changes(ws: &mut Workspace, changes: &[WorkspaceChange], now: DateTime<Utc>) {
    let state = &mut ws.state;
    for change in changes {
        match change {
            WorkspaceChange::Belief(m) => {
                for (k, v) in m {
                    state.beliefs.insert(k.clone(), v.clone());
                }
            }
            WorkspaceChange::BeliefHistory(entries) => {
                for (key, val) in entries {
                    let time = event_time(state.history.last(), now);
                    state.history.push(BeliefEvent::new(key.clone(), val.clone(), time));
                }
            }
            WorkspaceChange::Desire(s) => state.desire = s.clone(),
            WorkspaceChange::Action(s) => state.action = s.clone(),
            WorkspaceChange::Intent(m) => state.intent = m.clone(),
            WorkspaceChange::Slots(m) => state.slots = m.clone(),
            WorkspaceChange::FollowUp(f) => state.follow_up = f.clone(),
            WorkspaceChange::IsActive(b) => state.is_active = *b,
            WorkspaceChange::Cache(m) => {
                for (k, v) in m {
                    ws.cache.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

/// 时间戳不早于上一条事件
fn event_time(last: Option<&BeliefEvent>, now: DateTime<Utc>) -> String {
    let floor = last
        .and_then(|ev| DateTime::parse_from_rfc3339(&ev.time).ok())
        .map(|t| t.with_timezone(&Utc));
    match floor {
        Some(prev) if prev > now => prev.to_rfc3339(),
        _ => now.to_rfc3339(),
    }
}

/// 定位 workspace 所需的信息
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceRef<'a> {
    pub thread: &'a str,
    pub workspace_id: Option<&'a str>,
    pub public_user: Option<&'a str>,
}

/// 读-改-写 Workspace；同线程串行
pub struct WorkspaceMutator {
    store: Arc<dyn WorkspaceStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceMutator {
    pub fn new(store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn thread_lock(&self, thread: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(thread.to_string())
            .or_default()
            .clone()
    }

    /// 取当前 workspace：指定 id 则按 id，否则取线程下最新一个；没有则按种子新建
    pub async fn resolve(&self, target: WorkspaceRef<'_>) -> Result<Workspace, StoreError> {
        if let Some(id) = target.workspace_id {
            return self.store.get(target.thread, id).await;
        }
        let mut list = self.store.list(target.thread).await?;
        match list.pop() {
            Some(ws) => Ok(ws),
            None => {
                let mut seed = Map::new();
                if let Some(user) = target.public_user.filter(|u| !u.is_empty()) {
                    seed.insert("public_user".to_string(), Value::String(user.to_string()));
                }
                self.store.create(target.thread, seed).await
            }
        }
    }

    /// 应用变更并写回整份文档
    pub async fn mutate(
        &self,
        target: WorkspaceRef<'_>,
        changes: &[WorkspaceChange],
    ) -> Result<Workspace, StoreError> {
        let lock = self.thread_lock(target.thread).await;
        let result = {
            let _guard = lock.lock().await;
            self.commit(target, changes).await
        };
        self.release_lock(target.thread, lock).await;
        result
    }

    async fn commit(
        &self,
        target: WorkspaceRef<'_>,
        changes: &[WorkspaceChange],
    ) -> Result<Workspace, StoreError> {
        let mut ws = self.resolve(target).await?;
        apply_changes(&mut ws, changes, Utc::now());
        ws.version = self.store.put(&ws).await?;
        tracing::debug!(workspace = %ws.id, version = ws.version, changes = changes.len(), "workspace mutated");
        Ok(ws)
    }

    /// 没有其他等待者时移除线程锁，避免 map 随线程数无限增长
    async fn release_lock(&self, thread: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // map 与本调用各持一份
        let idle = locks.get(thread).is_some_and(|l| Arc::ptr_eq(l, &lock)) && Arc::strong_count(&lock) == 2;
        if idle {
            locks.remove(thread);
        }
    }
}
