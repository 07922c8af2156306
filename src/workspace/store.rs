//! Workspace 存储抽象层
//!
//! 只有整文档读写：list / create / get / put，没有局部更新。
//! put 带乐观版本校验：存储中的版本必须等于文档版本，成功后递增。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use super::model::Workspace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Workspace store error: {0}")]
    Backend(String),
}

/// Workspace 存储接口
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// 线程下所有 workspace，按创建顺序
    async fn list(&self, thread: &str) -> Result<Vec<Workspace>, StoreError>;

    /// 新建 workspace，seed 写入 context
    async fn create(&self, thread: &str, seed: Map<String, Value>) -> Result<Workspace, StoreError>;

    async fn get(&self, thread: &str, id: &str) -> Result<Workspace, StoreError>;

    /// 整文档写回，返回新版本号
    async fn put(&self, workspace: &Workspace) -> Result<u64, StoreError>;
}

/// 内存存储（测试与演示）
#[derive(Default)]
pub struct InMemoryWorkspaceStore {
    threads: RwLock<HashMap<String, Vec<Workspace>>>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn list(&self, thread: &str) -> Result<Vec<Workspace>, StoreError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, thread: &str, seed: Map<String, Value>) -> Result<Workspace, StoreError> {
        let ws = Workspace::new(thread, seed);
        self.threads
            .write()
            .await
            .entry(thread.to_string())
            .or_default()
            .push(ws.clone());
        tracing::debug!(thread = %thread, workspace = %ws.id, "workspace created");
        Ok(ws)
    }

    async fn get(&self, thread: &str, id: &str) -> Result<Workspace, StoreError> {
        self.threads
            .read()
            .await
            .get(thread)
            .and_then(|list| list.iter().find(|w| w.id == id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, workspace: &Workspace) -> Result<u64, StoreError> {
        let mut threads = self.threads.write().await;
        let stored = threads
            .get_mut(&workspace.thread)
            .and_then(|list| list.iter_mut().find(|w| w.id == workspace.id))
            .ok_or_else(|| StoreError::NotFound(workspace.id.clone()))?;
        if stored.version != workspace.version {
            return Err(StoreError::Conflict {
                id: workspace.id.clone(),
                expected: workspace.version,
                found: stored.version,
            });
        }
        *stored = workspace.clone();
        stored.version += 1;
        Ok(stored.version)
    }
}
