//! Workspace 层：文档模型、信念历史剪枝、类型化变更、存储抽象

pub mod history;
pub mod model;
pub mod mutator;
pub mod store;

pub use history::prune_history;
pub use model::{BeliefEvent, BeliefMap, FollowUp, Workspace, WorkspaceState};
pub use mutator::{apply_changes, WorkspaceChange, WorkspaceMutator, WorkspaceRef};
pub use store::{InMemoryWorkspaceStore, StoreError, WorkspaceStore};
