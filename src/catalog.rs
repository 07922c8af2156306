//! 动作 / 工具目录
//!
//! 目录由外部服务提供，核心只读：`query(portfolio, org, category, prefix)` 按 key 前缀匹配。

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::AgentError;

/// 目录中的动作：目标、示例话术与所需槽位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub key: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub utterances: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub slots: Vec<String>,
}

/// 目录中的工具：handler 为 `namespace/handler`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default = "empty_schema")]
    pub parameters: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// 既接受 `["a","b"]` 也接受 `"a, b"`
fn string_or_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::One(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Raw::Many(v) => v,
        Raw::Nothing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogCategory {
    Actions,
    Tools,
}

impl CatalogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogCategory::Actions => "actions",
            CatalogCategory::Tools => "tools",
        }
    }
}

/// 目录查询接口
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn query(
        &self,
        portfolio: &str,
        org: &str,
        category: CatalogCategory,
        prefix: &str,
    ) -> Result<Vec<Value>, String>;
}

async fn load<T: serde::de::DeserializeOwned>(
    catalog: &dyn Catalog,
    portfolio: &str,
    org: &str,
    category: CatalogCategory,
    prefix: &str,
) -> Result<Vec<T>, AgentError> {
    let docs = catalog
        .query(portfolio, org, category, prefix)
        .await
        .map_err(AgentError::Catalog)?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value::<T>(doc) {
            Ok(item) => out.push(item),
            Err(e) => {
                tracing::warn!(category = category.as_str(), error = %e, "malformed catalog entry skipped")
            }
        }
    }
    Ok(out)
}

pub async fn load_actions(
    catalog: &dyn Catalog,
    portfolio: &str,
    org: &str,
    prefix: &str,
) -> Result<Vec<ActionDescriptor>, AgentError> {
    load(catalog, portfolio, org, CatalogCategory::Actions, prefix).await
}

pub async fn load_tools(
    catalog: &dyn Catalog,
    portfolio: &str,
    org: &str,
    prefix: &str,
) -> Result<Vec<ToolDescriptor>, AgentError> {
    load(catalog, portfolio, org, CatalogCategory::Tools, prefix).await
}

struct CatalogEntry {
    portfolio: String,
    org: String,
    category: CatalogCategory,
    key: String,
    doc: Value,
}

/// 内存目录；org 为 `_all` 的条目对该 portfolio 下所有 org 可见
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        portfolio: &str,
        org: &str,
        category: CatalogCategory,
        key: &str,
        doc: Value,
    ) {
        self.entries.write().await.push(CatalogEntry {
            portfolio: portfolio.to_string(),
            org: org.to_string(),
            category,
            key: key.to_string(),
            doc,
        });
    }

    pub async fn add_action(&self, portfolio: &str, action: &ActionDescriptor) {
        let doc = serde_json::to_value(action).unwrap_or(Value::Null);
        self.insert(portfolio, "_all", CatalogCategory::Actions, &action.key, doc)
            .await;
    }

    pub async fn add_tool(&self, portfolio: &str, tool: &ToolDescriptor) {
        let doc = serde_json::to_value(tool).unwrap_or(Value::Null);
        self.insert(portfolio, "_all", CatalogCategory::Tools, &tool.key, doc)
            .await;
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn query(
        &self,
        portfolio: &str,
        org: &str,
        category: CatalogCategory,
        prefix: &str,
    ) -> Result<Vec<Value>, String> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.portfolio == portfolio)
            .filter(|e| e.org == org || e.org == "_all" || org == "_all")
            .filter(|e| e.category == category && e.key.starts_with(prefix))
            .map(|e| e.doc.clone())
            .collect())
    }
}
