//! BDI - 对话式任务完成引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求上下文、步骤调度、错误与恢复、编排器
//! - **decoder**: Oracle 输出的容错解码
//! - **projection**: 工具输出的声明式投影 / 过滤
//! - **workspace**: 会话文档、信念历史剪枝、变更与存储
//! - **catalog**: 动作 / 工具目录
//! - **perception**: 分类结果结构
//! - **slots**: 槽位匹配与动作选择
//! - **tools**: 处理器调用、执行适配器、信念解析器
//! - **llm**: Oracle 客户端抽象与实现（OpenAI 兼容 / Mock）、prompt 构建

pub mod catalog;
pub mod config;
pub mod core;
pub mod decoder;
pub mod llm;
pub mod observability;
pub mod perception;
pub mod projection;
pub mod slots;
pub mod tools;
pub mod workspace;

pub use crate::core::{Orchestrator, RunRequest, RunResponse};
