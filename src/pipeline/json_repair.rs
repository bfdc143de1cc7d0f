//! # 容错 JSON 提取
//!
//! 模型回复经常夹带说明文字、代码块、注释、尾随逗号，或者在输出上限处被截断。
//! 这里按以下顺序尝试：
//!
//! 1. 整段严格解析
//! 2. ```json 代码块，或从第一个 `{`/`[` 起做括号匹配截取后严格解析
//! 3. 修复：去掉 `//` 注释、给未加引号的键补引号、去掉尾随逗号、给裸选项值补引号
//! 4. 在最后一个完整元素处截断并补齐括号
//!
//! 只接受对象或数组。

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static UNQUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("valid regex")
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

static BARE_OPTION_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"("(?:correct_answer|options|distractor_options|正确答案|选项|干扰选项)"\s*:\s*)(\[?[A-G]\][^\n]*?)(\s*(?:,\s*"|,?\s*\n|\}|$))"#,
    )
    .expect("valid regex")
});

/// 从模型回复中提取 JSON 对象或数组
pub fn extract_json_value(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(value) = parse_structured(raw) {
        return Some(value);
    }

    let fenced = fenced_block(raw);
    let balanced = balanced_span(raw);

    for candidate in [fenced, balanced].into_iter().flatten() {
        if let Some(value) = parse_structured(candidate) {
            return Some(value);
        }
    }

    let tail = first_bracket(raw).map(|start| &raw[start..]);

    for candidate in [fenced, balanced, tail].into_iter().flatten() {
        let repaired = repair(candidate);
        if let Some(value) = parse_structured(&repaired) {
            return Some(value);
        }
        if let Some(closed) = close_truncated(&repaired) {
            if let Some(value) = parse_structured(&closed) {
                return Some(value);
            }
        }
    }

    None
}

fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) if value.is_object() || value.is_array() => Some(value),
        _ => None,
    }
}

fn first_bracket(text: &str) -> Option<usize> {
    text.find(['{', '['])
}

/// ```json 代码块的内容；缺少结尾标记时取到文本末尾
pub fn fenced_block(text: &str) -> Option<&str> {
    let (start, marker_len) = match text.find("```json") {
        Some(pos) => (pos, "```json".len()),
        None => (text.find("```")?, "```".len()),
    };

    let body_start = start + marker_len;
    let body = &text[body_start..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    let body = body.trim();
    if body.starts_with('{') || body.starts_with('[') {
        Some(body)
    } else {
        None
    }
}

/// 从第一个 `{` 或 `[` 开始，找到与之匹配的结束括号
///
/// 先做识别字符串的括号栈匹配，失败时退回只统计同类括号的朴素计数。
pub fn balanced_span(text: &str) -> Option<&str> {
    let start = first_bracket(text)?;
    let slice = &text[start..];
    string_aware_span(slice)
        .or_else(|| naive_span(slice))
        .map(|end| &slice[..end])
}

fn string_aware_span(text: &str) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

fn naive_span(text: &str) -> Option<usize> {
    let open = text.chars().next()?;
    let close = if open == '{' { '}' } else { ']' };
    let mut depth = 0i32;

    for (i, c) in text.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }

    None
}

/// 全部修复步骤
pub fn repair(text: &str) -> String {
    let text = strip_line_comments(text);
    let text = map_outside_strings(&text, |chunk| {
        let chunk = UNQUOTED_KEY.replace_all(chunk, "$1\"$2\":");
        TRAILING_COMMA.replace_all(&chunk, "$1").into_owned()
    });
    quote_bare_option_values(&text)
}

/// 去掉字符串之外的 `//` 行注释
pub fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if c == '/' && chars.peek() == Some(&'/') {
            while let Some(&next) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }

    out
}

/// 只对字符串字面量之外的片段应用 `f`
fn map_outside_strings<F>(text: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = String::with_capacity(text.len());
    let mut chunk_start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => {
                    in_string = false;
                    out.push_str(&text[chunk_start..=i]);
                    chunk_start = i + 1;
                }
                _ => {}
            }
        } else if c == '"' {
            out.push_str(&f(&text[chunk_start..i]));
            chunk_start = i;
            in_string = true;
        }
    }

    let rest = &text[chunk_start..];
    if in_string {
        out.push_str(rest);
    } else {
        out.push_str(&f(rest));
    }
    out
}

/// 给未加引号、以选项字母开头的值补引号，例如 `"correct_answer": [D] text`
///
/// 匹配的结尾可能吞掉下一个键的引号，所以反复替换直到不再变化。
pub fn quote_bare_option_values(text: &str) -> String {
    let mut current = text.to_string();

    for _ in 0..8 {
        let next = BARE_OPTION_VALUE
            .replace_all(&current, |caps: &Captures| {
                let value = caps[2].trim_end();
                let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value));
                format!("{}{}{}", &caps[1], quoted, &caps[3])
            })
            .into_owned();

        if next == current {
            break;
        }
        current = next;
    }

    current
}

/// 截断的回复：在最后一个完整元素处截断并补齐括号
///
/// 文本本身括号已平衡时返回 `None`。
pub fn close_truncated(text: &str) -> Option<String> {
    let start = first_bracket(text)?;
    let text = &text[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_cut: Option<(usize, Vec<char>)> = None;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    return None;
                }
                last_cut = Some((i + c.len_utf8(), stack.clone()));
            }
            ',' if !stack.is_empty() => last_cut = Some((i, stack.clone())),
            _ => {}
        }
    }

    if stack.is_empty() {
        return None;
    }

    let (cut, open) = last_cut?;
    let mut closed = text[..cut].trim_end().trim_end_matches(',').to_string();
    closed.extend(open.iter().rev());
    Some(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        assert_eq!(extract_json_value(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_rejects_non_structured_values() {
        assert_eq!(extract_json_value("42"), None);
        assert_eq!(extract_json_value("this is not json at all"), None);
        assert_eq!(extract_json_value(""), None);
    }

    #[test]
    fn test_fenced_block_with_chatter() {
        let raw = "Here is the result:\n```json\n{\"metadata\":{\"year\":\"2024\"}}\n```\nHope this helps!";
        assert_eq!(
            extract_json_value(raw),
            Some(json!({"metadata": {"year": "2024"}}))
        );
    }

    #[test]
    fn test_bracket_scan_ignores_braces_in_strings() {
        let raw = r#"结果如下 {"stem": "use } carefully", "n": [1, 2]} 以上"#;
        assert_eq!(
            extract_json_value(raw),
            Some(json!({"stem": "use } carefully", "n": [1, 2]}))
        );
    }

    #[test]
    fn test_naive_span_fallback() {
        // 未转义的引号让识别字符串的扫描失败
        let text = r#"{"a": "say "hi", "b": 1} trailing"#;
        assert_eq!(balanced_span(text), Some(r#"{"a": "say "hi", "b": 1}"#));
    }

    #[test]
    fn test_line_comments_removed() {
        let raw = "{\n  \"url\": \"http://example.com\", // 地址\n  \"n\": 1\n}";
        assert_eq!(
            extract_json_value(raw),
            Some(json!({"url": "http://example.com", "n": 1}))
        );
    }

    #[test]
    fn test_unquoted_keys() {
        assert_eq!(
            extract_json_value(r#"{number: 3, stem: "a: b"}"#),
            Some(json!({"number": 3, "stem": "a: b"}))
        );
    }

    #[test]
    fn test_trailing_commas() {
        assert_eq!(
            extract_json_value(r#"{"questions": [{"number": 1,}, {"number": 2},],}"#),
            Some(json!({"questions": [{"number": 1}, {"number": 2}]}))
        );
    }

    #[test]
    fn test_bare_option_values() {
        let raw = "{\n  \"number\": 5,\n  \"correct_answer\": [D] however,\n  \"options\": A] at, B] in\n}";
        let value = extract_json_value(raw).unwrap();
        assert_eq!(value["correct_answer"], "[D] however");
        assert_eq!(value["options"], "A] at, B] in");
    }

    #[test]
    fn test_truncated_reply_closed_at_last_element() {
        let raw = r#"{"questions": [{"number": 1, "stem": "a"}, {"number": 2, "stem": "b"}, {"number": 3, "st"#;
        let value = extract_json_value(raw).unwrap();
        let questions = value["questions"].as_array().unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[1]["stem"], "b");
        assert_eq!(questions[2], json!({"number": 3}));
    }

    #[test]
    fn test_close_truncated_skips_balanced_text() {
        assert_eq!(close_truncated(r#"{"a": [1, 2]}"#), None);
    }

    #[test]
    fn test_top_level_array() {
        assert_eq!(
            extract_json_value("[{\"number\": 1}]"),
            Some(json!([{"number": 1}]))
        );
    }
}
