//! # 响应规范化
//!
//! 把模型回复 (任意文本) 转换为 [`ParsedSegmentResult`]。任何解析错误都不会向外传播：
//! 无法提取 JSON 时返回空结果并保留原始文本。

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::json_repair::extract_json_value;
use crate::types::{ExamMetadata, ParsedSegmentResult, QuestionRecord, SectionKey, SectionPatch};

const QUESTION_LIST_KEYS: &[&str] = &["questions", "items", "data", "results", "题目"];
const SECTION_CONTAINER_KEYS: &[&str] = &["sections", "板块", "原文"];
const METADATA_KEYS: &[&str] = &["metadata", "元数据", "基本信息"];

const NUMBER_KEYS: &[&str] = &["number", "question_number", "题目编号", "题号", "id"];
const SECTION_TYPE_KEYS: &[&str] = &["section_type", "题型", "type"];
const STEM_KEYS: &[&str] = &["stem", "题干", "question"];
const OPTIONS_KEYS: &[&str] = &["options", "选项"];
const CORRECT_ANSWER_KEYS: &[&str] = &["correct_answer", "正确答案", "answer", "答案"];
const DISTRACTOR_KEYS: &[&str] = &["distractor_options", "distractors", "干扰选项"];

const ORIGINAL_TEXT_KEYS: &[&str] = &["original_text", "原文（卷面）", "原文(卷面)", "text"];
const RESTORED_TEXT_KEYS: &[&str] = &["restored_text", "原文（还原后）", "原文(还原后)"];
const ANSWERS_SUMMARY_KEYS: &[&str] = &["answers_summary", "答案汇总", "试卷答案"];

/// 规范化一条模型回复
pub fn normalize(raw_text: &str) -> ParsedSegmentResult {
    match extract_json_value(raw_text) {
        Some(value) => {
            let result = from_value(&value);
            debug!(
                sections = result.sections.len(),
                questions = result.questions.len(),
                "回复解析完成"
            );
            result
        }
        None => {
            let preview: String = raw_text.chars().take(200).collect();
            warn!("❌ 无法从回复中提取 JSON，前 200 字符: {}", preview);
            ParsedSegmentResult::failed(raw_text)
        }
    }
}

/// 把已解析的 JSON 值映射为分段结果
pub fn from_value(value: &Value) -> ParsedSegmentResult {
    match value {
        Value::Array(items) => ParsedSegmentResult {
            questions: parse_questions(items),
            ..ParsedSegmentResult::empty()
        },
        Value::Object(object) => ParsedSegmentResult {
            metadata: parse_metadata(object),
            sections: parse_sections(object),
            questions: first_array(object, QUESTION_LIST_KEYS)
                .map(|items| parse_questions(items))
                .unwrap_or_default(),
            unparsed_reply: None,
        },
        _ => ParsedSegmentResult::empty(),
    }
}

fn first_value<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn first_array<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| object.get(*key).and_then(Value::as_array))
}

fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(value_text)
}

/// 把任意 JSON 值转为文本字段
///
/// 数组按 ", " 拼接，形如 `{"A": "x"}` 的对象转为 "A. x"。空串和 null 视为缺失。
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null | Value::Bool(_) => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| value_text(value).map(|text| format!("{}. {}", key, text)))
            .collect::<Vec<_>>()
            .join(", "),
    };

    if text.is_empty() { None } else { Some(text) }
}

fn parse_metadata(object: &Map<String, Value>) -> ExamMetadata {
    let source = first_value(object, METADATA_KEYS)
        .and_then(Value::as_object)
        .unwrap_or(object);

    ExamMetadata {
        year: first_text(source, &["year", "年份"]),
        exam_type: first_text(source, &["exam_type", "考试类型"]),
    }
}

fn parse_sections(object: &Map<String, Value>) -> BTreeMap<SectionKey, SectionPatch> {
    let mut sections = BTreeMap::new();

    if let Some(container) = first_value(object, SECTION_CONTAINER_KEYS).and_then(Value::as_object) {
        collect_sections(container, "", &mut sections);
    }

    sections
}

fn is_section_leaf(object: &Map<String, Value>) -> bool {
    ORIGINAL_TEXT_KEYS
        .iter()
        .chain(RESTORED_TEXT_KEYS)
        .chain(ANSWERS_SUMMARY_KEYS)
        .any(|key| object.contains_key(*key))
}

/// 递归展开嵌套的板块，如 `reading.text_1`、`writing.part_a`
fn collect_sections(object: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<SectionKey, SectionPatch>) {
    for (name, value) in object {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };

        let patch = match value {
            Value::Object(inner) if is_section_leaf(inner) => SectionPatch {
                original_text: first_text(inner, ORIGINAL_TEXT_KEYS),
                restored_text: first_text(inner, RESTORED_TEXT_KEYS),
                answers_summary: first_text(inner, ANSWERS_SUMMARY_KEYS),
            },
            Value::Object(inner) => {
                collect_sections(inner, &path, out);
                continue;
            }
            Value::String(_) => SectionPatch {
                original_text: value_text(value),
                ..SectionPatch::default()
            },
            _ => continue,
        };

        match SectionKey::from_alias(&path).or_else(|| SectionKey::from_alias(name)) {
            Some(key) => out.entry(key).or_default().overlay(patch),
            None => debug!(section = %path, "忽略无法识别的板块"),
        }
    }
}

fn parse_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn parse_questions(items: &[Value]) -> Vec<QuestionRecord> {
    items
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let number = NUMBER_KEYS
                .iter()
                .filter_map(|key| object.get(*key))
                .find_map(parse_number);

            let Some(number) = number else {
                debug!("跳过没有题号的题目");
                return None;
            };

            Some(QuestionRecord {
                section_type: first_text(object, SECTION_TYPE_KEYS),
                stem: first_text(object, STEM_KEYS),
                options: first_text(object, OPTIONS_KEYS),
                correct_answer: first_text(object, CORRECT_ANSWER_KEYS),
                distractor_options: first_text(object, DISTRACTOR_KEYS),
                ..QuestionRecord::new(number)
            })
        })
        .collect()
}
