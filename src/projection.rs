//! 投影/过滤引擎
//!
//! 用一棵声明式投影树裁剪任意 JSON：
//! - `true`：原样保留
//! - 对象投影作用于对象：逐键递归；`"*": true` 保留全部字段，`"!field": true` 排除
//! - 对象投影作用于数组：`$filter` -> `$sort_by`(+`$reverse`) -> `$min`/`$max` -> `$limit` -> `items`
//! - 数组投影作用于数组：用第一个元素投影每一项
//!
//! 引擎无副作用，从不修改输入。

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

const CONTROL_KEYS: [&str; 7] = ["$filter", "$sort_by", "$reverse", "$limit", "$min", "$max", "items"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("Invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn parse(op: &str) -> Result<Self, ProjectionError> {
        match op {
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            other => Err(ProjectionError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// 字段比较谓词：`price < 600`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

static DSL_RE: OnceLock<Regex> = OnceLock::new();

impl Comparison {
    /// 解析 DSL 表达式；右值按 JSON 字面量解析，失败时去引号当作字符串
    pub fn parse(expr: &str) -> Result<Self, ProjectionError> {
        let re = DSL_RE.get_or_init(|| {
            Regex::new(r"^\s*(\w+)\s*(<=|>=|==|!=|<|>)\s*(.+?)\s*$").unwrap()
        });
        let caps = re
            .captures(expr)
            .ok_or_else(|| ProjectionError::InvalidFilter(expr.to_string()))?;
        Ok(Self {
            field: caps[1].to_string(),
            op: CompareOp::parse(&caps[2])?,
            value: parse_literal(&caps[3]),
        })
    }

    /// 结构化谓词：`{"field": "price", "op": "<", "value": 600}`
    pub fn from_object(obj: &Map<String, Value>) -> Result<Self, ProjectionError> {
        let field = obj
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| ProjectionError::InvalidFilter(Value::Object(obj.clone()).to_string()))?;
        let op = obj.get("op").and_then(Value::as_str).unwrap_or("==");
        Ok(Self {
            field: field.to_string(),
            op: CompareOp::parse(op)?,
            value: obj.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn matches(&self, item: &Value) -> bool {
        let actual = item.get(&self.field).unwrap_or(&Value::Null);
        let ord = compare_same_kind(actual, &self.value);
        match self.op {
            CompareOp::Eq => values_equal(actual, &self.value),
            CompareOp::Ne => !values_equal(actual, &self.value),
            CompareOp::Lt => ord == Some(Ordering::Less),
            CompareOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ord == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

fn parse_literal(raw: &str) -> Value {
    match raw {
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        "None" => return Value::Null,
        _ => {}
    }
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    Value::String(raw.trim_matches('"').trim_matches('\'').to_string())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// 同类值比较；类型不同返回 None
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// 排序用的全序：先按类型，再按同类值
fn total_cmp(a: &Value, b: &Value) -> Ordering {
    compare_same_kind(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

fn field_of<'a>(item: &'a Value, key: &str) -> &'a Value {
    item.get(key).unwrap_or(&Value::Null)
}

fn build_filter(filter: &Value) -> Result<Option<Comparison>, ProjectionError> {
    match filter {
        Value::String(expr) => Comparison::parse(expr).map(Some),
        Value::Object(obj) => Comparison::from_object(obj).map(Some),
        _ => Ok(None),
    }
}

fn project_list(items: &[Value], projection: &Map<String, Value>) -> Result<Value, ProjectionError> {
    let mut data: Vec<&Value> = items.iter().collect();

    if let Some(filter) = projection.get("$filter") {
        if let Some(pred) = build_filter(filter)? {
            data.retain(|item| pred.matches(item));
        }
    }

    if let Some(key) = projection.get("$sort_by").and_then(Value::as_str) {
        data.sort_by(|a, b| total_cmp(field_of(a, key), field_of(b, key)));
        if projection.get("$reverse").and_then(Value::as_bool).unwrap_or(false) {
            data.reverse();
        }
    }

    if let Some(key) = projection.get("$min").and_then(Value::as_str) {
        data = extremum(&data, key, Ordering::Less).into_iter().collect();
    } else if let Some(key) = projection.get("$max").and_then(Value::as_str) {
        data = extremum(&data, key, Ordering::Greater).into_iter().collect();
    }

    if let Some(limit) = projection.get("$limit").and_then(Value::as_u64) {
        data.truncate(limit as usize);
    }

    let out = match projection.get("items") {
        Some(item_projection) => data
            .into_iter()
            .map(|item| project(item, item_projection))
            .collect::<Result<Vec<_>, _>>()?,
        None => data.into_iter().cloned().collect(),
    };
    Ok(Value::Array(out))
}

/// 返回首个极值元素（并列时取最靠前者）
fn extremum<'a>(data: &[&'a Value], key: &str, wanted: Ordering) -> Option<&'a Value> {
    let mut best: Option<&'a Value> = None;
    for item in data {
        best = match best {
            Some(current) if total_cmp(field_of(item, key), field_of(current, key)) != wanted => {
                Some(current)
            }
            _ => Some(*item),
        };
    }
    best
}

fn project_object(
    data: &Map<String, Value>,
    projection: &Map<String, Value>,
) -> Result<Value, ProjectionError> {
    let mut result = Map::new();
    for (key, sub) in projection {
        if CONTROL_KEYS.contains(&key.as_str()) || key.starts_with('!') {
            continue;
        }
        if key == "*" {
            for (k, v) in data {
                if !projection.contains_key(&format!("!{k}")) {
                    result.insert(k.clone(), v.clone());
                }
            }
            continue;
        }
        if let Some(value) = data.get(key) {
            result.insert(key.clone(), project(value, sub)?);
        }
    }
    Ok(Value::Object(result))
}

/// 按投影裁剪数据
pub fn project(data: &Value, projection: &Value) -> Result<Value, ProjectionError> {
    match (projection, data) {
        (Value::Object(p), Value::Array(items)) => project_list(items, p),
        (Value::Object(p), Value::Object(obj)) => project_object(obj, p),
        (Value::Object(_), _) => Ok(Value::Object(Map::new())),
        (Value::Array(p), Value::Array(items)) => match p.first() {
            Some(item_projection) => items
                .iter()
                .map(|item| project(item, item_projection))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            None => Ok(Value::Null),
        },
        (Value::Bool(true), _) => Ok(data.clone()),
        _ => Ok(Value::Null),
    }
}
