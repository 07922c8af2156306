//! 容错结构化输出解码
//!
//! Oracle 的输出「应该」是一个 JSON 对象/数组，但常带注释、未加引号的键、单引号字符串、
//! 尾逗号或形如 `[123] ` 的时间戳残片。decode 按固定顺序逐层修复，首个解析成功即返回；
//! 全部失败时返回 DecodeError（携带原文与最后一次归一化后的文本）。

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// 解码失败：原文与最终归一化文本都保留，便于排查
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Undecodable oracle output: {reason}")]
pub struct DecodeError {
    pub reason: String,
    pub original: String,
    pub normalized: String,
}

static LINE_COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static BLOCK_COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static OBJECT_START_KEY_RE: OnceLock<Regex> = OnceLock::new();
static COMMA_KEY_RE: OnceLock<Regex> = OnceLock::new();
static NEWLINE_KEY_RE: OnceLock<Regex> = OnceLock::new();
static SINGLE_QUOTED_KEY_RE: OnceLock<Regex> = OnceLock::new();
static SINGLE_QUOTED_VALUE_RE: OnceLock<Regex> = OnceLock::new();
static BOOLEAN_RE: OnceLock<Regex> = OnceLock::new();
static TRAILING_COMMA_RE: OnceLock<Regex> = OnceLock::new();
static BRACKET_STAMP_RE: OnceLock<Regex> = OnceLock::new();
static RAW_FIELD_RE: OnceLock<Regex> = OnceLock::new();

fn line_comment_re() -> &'static Regex {
    LINE_COMMENT_RE.get_or_init(|| Regex::new(r"(?m)//.*?$").unwrap())
}

fn block_comment_re() -> &'static Regex {
    BLOCK_COMMENT_RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

/// 去掉 `//` 与 `/* */` 注释
pub fn strip_comments(text: &str) -> String {
    let without_lines = line_comment_re().replace_all(text, "");
    block_comment_re().replace_all(&without_lines, "").into_owned()
}

/// 给未加引号的键补双引号（对象开头、逗号之后、换行之后）
///
/// 对象开头只认文本起始或值位置（`:` `[` `,` 之后）的 `{`，正文里的花括号不动。
pub fn quote_bare_keys(text: &str) -> String {
    let object_start = OBJECT_START_KEY_RE
        .get_or_init(|| Regex::new(r"(^\s*|[:\[,]\s*)\{\s*(\w+)(\s*:)").unwrap());
    let after_comma = COMMA_KEY_RE.get_or_init(|| Regex::new(r",\s*(\w+)(\s*:)").unwrap());
    let after_newline = NEWLINE_KEY_RE.get_or_init(|| Regex::new(r"\n\s*(\w+)(\s*:)").unwrap());

    // 外层键的冒号被匹配吃掉，嵌套对象要再扫一遍；已加引号的键不会再匹配
    let mut s = text.to_string();
    loop {
        let next = match object_start.replace_all(&s, r#"${1}{"${2}"${3}"#) {
            Cow::Owned(next) => next,
            Cow::Borrowed(_) => break,
        };
        s = next;
    }
    let s = after_comma.replace_all(&s, r#","${1}"${2}"#);
    after_newline.replace_all(&s, "\n\"${1}\"${2}").into_owned()
}

/// 单引号键与单引号字符串值改为双引号
pub fn convert_single_quotes(text: &str) -> String {
    let keys = SINGLE_QUOTED_KEY_RE
        .get_or_init(|| Regex::new(r#"([{,]\s*)'(\w+)'(\s*:)"#).unwrap());
    let values = SINGLE_QUOTED_VALUE_RE.get_or_init(|| Regex::new(r":\s*'([^']*)'").unwrap());

    let s = keys.replace_all(text, r#"${1}"${2}"${3}"#);
    values.replace_all(&s, r#": "${1}""#).into_owned()
}

/// 去掉冒号与布尔字面量之间的空白，并把 True/False 写成 JSON 小写形式
pub fn normalize_booleans(text: &str) -> String {
    let re = BOOLEAN_RE.get_or_init(|| Regex::new(r":\s+(true|false|True|False)").unwrap());
    re.replace_all(text, |caps: &Captures| format!(":{}", caps[1].to_lowercase()))
        .into_owned()
}

/// 删除 `}` / `]` 前的尾逗号
pub fn remove_trailing_commas(text: &str) -> String {
    let re = TRAILING_COMMA_RE.get_or_init(|| Regex::new(r",(\s*[}\]])").unwrap());
    re.replace_all(text, "${1}").into_owned()
}

/// 删除 `[123] ` 形式的时间戳残片
pub fn strip_bracket_stamps(text: &str) -> String {
    let re = BRACKET_STAMP_RE.get_or_init(|| Regex::new(r"\[\d+\]\s*").unwrap());
    re.replace_all(text, "").into_owned()
}

/// 只修复 `"raw": {...}` 子字段内部的单引号
pub fn repair_raw_field(text: &str) -> String {
    let re = RAW_FIELD_RE.get_or_init(|| Regex::new(r#""raw":\s*(\{[^}]+\})"#).unwrap());
    re.replace_all(text, |caps: &Captures| {
        format!("\"raw\": {}", caps[1].replace('\'', "\""))
    })
    .into_owned()
}

/// 依次应用全部通用归一化
fn normalize(text: &str) -> String {
    let s = quote_bare_keys(text);
    let s = convert_single_quotes(&s);
    let s = normalize_booleans(&s);
    let s = remove_trailing_commas(&s);
    strip_bracket_stamps(&s)
}

/// 取出 ```json 围栏中的内容；没有围栏时原样返回
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.find("```")
        .map(|end| rest[..end].trim())
        .unwrap_or_else(|| rest.trim())
}

/// 容错解码：首个成功的阶段即返回
pub fn decode(text: &str) -> Result<Value, DecodeError> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }

    let unfenced = strip_code_fence(text);
    let stripped = strip_comments(unfenced);
    if let Ok(v) = serde_json::from_str::<Value>(stripped.trim()) {
        return Ok(v);
    }

    let normalized = normalize(&stripped);
    if let Ok(v) = serde_json::from_str::<Value>(normalized.trim()) {
        tracing::debug!("oracle output decoded after normalization");
        return Ok(v);
    }

    let repaired = repair_raw_field(&normalized);
    match serde_json::from_str::<Value>(repaired.trim()) {
        Ok(v) => Ok(v),
        Err(e) => Err(DecodeError {
            reason: e.to_string(),
            original: text.to_string(),
            normalized: repaired,
        }),
    }
}

/// 解码并反序列化为具体类型；结构不符也算解码失败
pub fn decode_as<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let value = decode(text)?;
    serde_json::from_value(value).map_err(|e| DecodeError {
        reason: e.to_string(),
        original: text.to_string(),
        normalized: text.to_string(),
    })
}

/// 去掉一层外部转义：`"{\"a\":1}"` -> `{"a":1}`；已经是对象时原样返回
pub fn remove_outer_escape(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::String(inner) => serde_json::from_str::<Value>(&inner).ok(),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_is_identity() {
        let samples = [
            r#"{"a": 1, "b": [true, null, "x"]}"#,
            r#"{"url": "https://example.com/a//b"}"#,
            r#"[1, 2, 3]"#,
            r#"{"note": "/* not a comment */"}"#,
        ];
        for s in samples {
            let expected: Value = serde_json::from_str(s).unwrap();
            assert_eq!(decode(s).unwrap(), expected);
        }
    }

    #[test]
    fn test_bare_key_single_quote_trailing_comma() {
        assert_eq!(decode("{status:'valid',}").unwrap(), json!({"status": "valid"}));
    }

    #[test]
    fn test_strip_comments() {
        let text = "{\n  \"a\": 1, // first\n  /* block\n comment */ \"b\": 2\n}";
        assert_eq!(decode(text).unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_quote_bare_keys_after_newline() {
        let text = "{\n  name: \"Ana\"\n  , age: 3\n}";
        let s = quote_bare_keys(text);
        assert!(s.contains("\"name\""));
        assert!(s.contains("\"age\""));
        assert_eq!(decode(text).unwrap(), json!({"name": "Ana", "age": 3}));
    }

    #[test]
    fn test_nested_bare_keys() {
        let text = "{slots: {origin: 'GRU', destination: 'REC'}, complete: True,}";
        assert_eq!(
            decode(text).unwrap(),
            json!({"slots": {"origin": "GRU", "destination": "REC"}, "complete": true})
        );
    }

    #[test]
    fn test_braces_in_prose_are_left_alone() {
        assert_eq!(quote_bare_keys("see {a: 1}"), "see {a: 1}");
        assert_eq!(quote_bare_keys("{a: {b: {c: 1}}}"), r#"{"a": {"b": {"c": 1}}}"#);
        assert_eq!(quote_bare_keys("[{a: 1}, {b: 2}]"), r#"[{"a": 1}, {"b": 2}]"#);
        assert_eq!(quote_bare_keys("  {x: 1}"), r#"  {"x": 1}"#);
    }

    #[test]
    fn test_single_quoted_keys() {
        let s = convert_single_quotes("{'city': 'Recife', 'days': 3}");
        assert_eq!(s, r#"{"city": "Recife", "days": 3}"#);
    }

    #[test]
    fn test_normalize_python_booleans() {
        assert_eq!(normalize_booleans(r#"{"ok": True, "x":  false}"#), r#"{"ok":true, "x":false}"#);
        assert_eq!(decode("{ok: True}").unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_remove_trailing_commas() {
        assert_eq!(remove_trailing_commas(r#"{"a": [1, 2, ], }"#), r#"{"a": [1, 2 ] }"#);
    }

    #[test]
    fn test_strip_bracket_stamps() {
        let text = "[1712345] {\"a\": 1,}";
        assert_eq!(decode(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_raw_field_repair() {
        let text = r#"{"kind": "doc", "raw": {'title' : 7}}"#;
        assert_eq!(repair_raw_field(text), r#"{"kind": "doc", "raw": {"title" : 7}}"#);

        // 数组里的单引号只有 raw 修复能处理
        let text = r#"{"raw": {"tags": ['a', 'b']}}"#;
        assert_eq!(decode(text).unwrap(), json!({"raw": {"tags": ["a", "b"]}}));
    }

    #[test]
    fn test_code_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(decode(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_failure_keeps_both_texts() {
        let err = decode("not json at all // trailing").unwrap_err();
        assert_eq!(err.original, "not json at all // trailing");
        assert_eq!(err.normalized.trim(), "not json at all");
    }

    #[test]
    fn test_decode_as_struct() {
        #[derive(serde::Deserialize)]
        struct Reply {
            status: String,
        }
        let r: Reply = decode_as("{status:'ok'}").unwrap();
        assert_eq!(r.status, "ok");
        assert!(decode_as::<Reply>("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_remove_outer_escape() {
        let double = r#""{\"raw_document\":\"Wood\"}""#;
        assert_eq!(remove_outer_escape(double), Some(json!({"raw_document": "Wood"})));
        assert_eq!(remove_outer_escape(r#"{"a":1}"#), Some(json!({"a": 1})));
        assert_eq!(remove_outer_escape("nope"), None);
    }
}
