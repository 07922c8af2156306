//! 信念解析器
//!
//! enrich 步骤对 `perception.needs_tools` 中的每个解析器做确定性补全：
//! - calendar：`today` / `tomorrow` / `next <weekday>` -> `YYYY-MM-DD`
//! - calculator：`"N friends"` -> N+1，`"N people"` -> N，写入 `total_people`
//! - web_search：非空目的地标记 `is_valid_destination`

use std::sync::OnceLock;

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use regex::Regex;
use serde_json::{Map, Value};

static PEOPLE_RE: OnceLock<Regex> = OnceLock::new();

fn people_re() -> &'static Regex {
    PEOPLE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+)\s*(friends?|people|persons?|guests?|adults?)?\s*$").unwrap()
    })
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    match name.trim().to_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// 解析器集合；默认每次解析都取本地当天，测试可固定日期
#[derive(Debug, Clone, Default)]
pub struct BeliefResolvers {
    fixed_today: Option<NaiveDate>,
}

impl BeliefResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(today: NaiveDate) -> Self {
        Self {
            fixed_today: Some(today),
        }
    }

    fn today(&self) -> NaiveDate {
        self.fixed_today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// 相对日期归一化；已是 `YYYY-MM-DD` 的原样返回，无法识别的返回 None
    pub fn normalize_date(&self, text: &str) -> Option<String> {
        let lower = text.trim().to_lowercase();
        let today = self.today();
        let date = match lower.as_str() {
            "today" => today,
            "tomorrow" => today + Duration::days(1),
            other => {
                if let Ok(d) = NaiveDate::parse_from_str(other, "%Y-%m-%d") {
                    d
                } else {
                    let target = parse_weekday(other.strip_prefix("next ")?)?;
                    let from = today.weekday().num_days_from_monday() as i64;
                    let to = target.num_days_from_monday() as i64;
                    let mut ahead = (to - from).rem_euclid(7);
                    if ahead == 0 {
                        ahead = 7;
                    }
                    today + Duration::days(ahead)
                }
            }
        };
        Some(date.format("%Y-%m-%d").to_string())
    }

    /// 人数：friends 要加上用户本人
    pub fn count_people(&self, value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => {
                let caps = people_re().captures(s)?;
                let n: u64 = caps.get(1)?.as_str().parse().ok()?;
                let is_friends = caps
                    .get(2)
                    .map(|m| m.as_str().to_lowercase().starts_with("friend"))
                    .unwrap_or(false);
                if is_friends {
                    n.checked_add(1)
                } else {
                    Some(n)
                }
            }
            _ => None,
        }
    }

    /// 依次运行 needs_tools 中的解析器，返回要记录的 (key, val)
    pub fn resolve(&self, needs_tools: &[String], entities: &Map<String, Value>) -> Vec<(String, Value)> {
        let mut resolved = Vec::new();
        for tool in needs_tools {
            match tool.as_str() {
                "calendar" => {
                    if let Some(date) = entities
                        .get("date")
                        .and_then(Value::as_str)
                        .and_then(|d| self.normalize_date(d))
                    {
                        resolved.push(("date".to_string(), Value::String(date)));
                    }
                }
                "calculator" => {
                    if let Some(total) = entities.get("people").and_then(|p| self.count_people(p)) {
                        resolved.push(("total_people".to_string(), Value::from(total)));
                    }
                }
                "web_search" => {
                    let valid = entities
                        .get("destination")
                        .and_then(Value::as_str)
                        .map(|d| !d.trim().is_empty())
                        .unwrap_or(false);
                    if valid {
                        resolved.push(("is_valid_destination".to_string(), Value::Bool(true)));
                    }
                }
                other => tracing::debug!(resolver = %other, "no belief resolver, skipped"),
            }
        }
        resolved
    }
}
