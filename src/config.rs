//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BDI__*` 覆盖（双下划线表示嵌套，如 `BDI__ORCHESTRATOR__MAX_ITERATIONS=12`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
    pub catalog: CatalogSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、各用途的模型与温度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// mock / openai
    pub provider: String,
    pub base_url: Option<String>,
    /// 分类、槽位、规划使用的模型
    pub model: String,
    pub temperature: f32,
    /// 反思使用的模型
    pub reflection_model: String,
    pub reflection_temperature: f32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: 0.0,
            reflection_model: default_model(),
            reflection_temperature: default_reflection_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_reflection_temperature() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次 Oracle 请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：守卫上限与动作选择阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 单轮最多执行的步骤数
    pub max_iterations: usize,
    /// 请求未带 org 时使用
    pub default_org: String,
    /// 槽位齐全后先向用户确认再执行
    pub confirm_before_execute: bool,
    /// 首次采纳动作的最低置信度（0-100）
    pub min_action_confidence: f64,
    /// 替换已选动作的最低置信度（0-100）
    pub action_change_confidence: f64,
    /// 送入规划 prompt 的最近工具结果条数
    pub recent_tool_messages: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            default_org: default_org(),
            confirm_before_execute: false,
            min_action_confidence: 50.0,
            action_change_confidence: 80.0,
            recent_tool_messages: 1,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_org() -> String {
    "_all".to_string()
}

/// [tools] 段：工具超时、审计日志参数预览长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub args_preview_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            args_preview_chars: 200,
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [catalog] 段：目录查询的 key 前缀（空串 = 全部）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    pub action_prefix: String,
    pub tool_prefix: String,
}

/// 从 config 目录加载配置，环境变量 BDI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BDI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BDI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置；调用方决定是否用新配置重建 Orchestrator
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
