//! # 补全与校验
//!
//! 把合并后的记录补全为恰好 52 道题：缺号插入占位、重号保留最完整的一条、
//! 题型按题号范围规范化、原文按板块共享、答案统一为单个字母。
//! 校验结果只记录为警告。

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::types::{
    ExamMetadata, FinalQuestion, FinalRecord, MISSING_MARKER, MergedRecord, QuestionRecord, RecordOrigin,
    ResolvedMetadata, SectionKey, SectionText, TOTAL_QUESTIONS, ValidationReport,
};

static ANSWER_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})\s*[.．、:：\-－]?\s*[\[【]?([A-Ga-g])[\]】]?").expect("valid regex")
});

/// 解析答案汇总，如 "1.A 2.B"、"1-A"、"1:A"、"1A"、"1.[A]"、"答案：1.A"
///
/// 题号前不能紧跟数字，字母后不能紧跟英文字母，以免把年份或单词误认为答案。
pub fn parse_answer_summary(summary: &str) -> BTreeMap<u32, String> {
    let mut answers = BTreeMap::new();

    for caps in ANSWER_ENTRY.captures_iter(summary) {
        let Some(whole) = caps.get(0) else { continue };

        let preceded_by_digit = summary[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());
        let followed_by_letter = summary[whole.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());

        if preceded_by_digit || followed_by_letter {
            continue;
        }

        let Ok(number) = caps[1].parse::<u32>() else { continue };
        if (1..=TOTAL_QUESTIONS).contains(&number) {
            answers.insert(number, caps[2].to_ascii_uppercase());
        }
    }

    answers
}

/// 从 `correct_answer` 开头取选项字母，如 "A. Without" 或 "[B] however"
pub fn leading_letter(correct_answer: &str) -> Option<String> {
    let trimmed = correct_answer.trim().trim_start_matches(['[', '【', '(', '（']);
    let mut chars = trimmed.chars();
    let first = chars.next()?;

    if !('A'..='G').contains(&first.to_ascii_uppercase()) || !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(first.to_ascii_uppercase().to_string())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn resolve_metadata(metadata: &ExamMetadata, year: Option<&str>, exam_type: Option<&str>) -> ResolvedMetadata {
    ResolvedMetadata {
        year: non_empty(year)
            .or_else(|| non_empty(metadata.year.as_deref()))
            .unwrap_or_default(),
        exam_type: non_empty(exam_type)
            .or_else(|| non_empty(metadata.exam_type.as_deref()))
            .unwrap_or_default(),
    }
}

/// 在重复题号之间挑选：真实提取优先，其次有内容的字段更多
fn completeness(record: &QuestionRecord) -> (bool, usize) {
    (record.origin == RecordOrigin::Extracted, record.filled_field_count())
}

fn missing_passage(key: SectionKey) -> Arc<SectionText> {
    let text = format!("{} {} 原文", MISSING_MARKER, key.canonical_name());
    Arc::new(SectionText {
        original_text: text.clone(),
        restored_text: text,
        answers_summary: String::new(),
    })
}

/// 补全为最终记录
///
/// `year`、`exam_type` 为调用方指定的值，优先于模型提取的元数据。
pub fn complete(record: MergedRecord, year: Option<&str>, exam_type: Option<&str>) -> FinalRecord {
    let mut warnings = Vec::new();
    let metadata = resolve_metadata(&record.metadata, year, exam_type);

    let sections: BTreeMap<SectionKey, Arc<SectionText>> = record
        .sections
        .into_iter()
        .map(|(key, patch)| {
            let original_text = patch.original_text.unwrap_or_default();
            let text = SectionText {
                restored_text: patch.restored_text.unwrap_or_else(|| original_text.clone()),
                original_text,
                answers_summary: patch.answers_summary.unwrap_or_default(),
            };
            (key, Arc::new(text))
        })
        .collect();

    let mut answer_map = BTreeMap::new();
    for text in sections.values() {
        answer_map.extend(parse_answer_summary(&text.answers_summary));
    }

    // 去重并丢弃越界题号
    let mut by_number: BTreeMap<u32, QuestionRecord> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for question in record.questions {
        if !(1..=TOTAL_QUESTIONS).contains(&question.number) {
            warnings.push(format!("题号 {} 超出范围 1-{}，已丢弃", question.number, TOTAL_QUESTIONS));
            continue;
        }

        match by_number.get(&question.number) {
            Some(existing) => {
                duplicates.push(question.number);
                if completeness(&question) > completeness(existing) {
                    by_number.insert(question.number, question);
                }
            }
            None => {
                by_number.insert(question.number, question);
            }
        }
    }

    if !duplicates.is_empty() {
        duplicates.dedup();
        warnings.push(format!("存在重复题号 {:?}，已保留最完整的记录", duplicates));
    }

    let mut missing_sections: BTreeMap<SectionKey, Arc<SectionText>> = BTreeMap::new();
    let mut missing_numbers = Vec::new();
    let mut questions = Vec::with_capacity(TOTAL_QUESTIONS as usize);

    for number in 1..=TOTAL_QUESTIONS {
        let mut question = by_number.remove(&number).unwrap_or_else(|| {
            missing_numbers.push(number);
            QuestionRecord::placeholder(number)
        });

        let Some(range_key) = SectionKey::for_question(number) else { continue };
        let alias_key = question.section_type.as_deref().and_then(SectionKey::from_alias);
        question.section_type = Some(range_key.canonical_name());

        let passage = sections
            .get(&range_key)
            .or_else(|| alias_key.and_then(|key| sections.get(&key)))
            .cloned()
            .unwrap_or_else(|| {
                missing_sections
                    .entry(range_key)
                    .or_insert_with(|| missing_passage(range_key))
                    .clone()
            });

        let answer_letter = answer_map
            .get(&number)
            .cloned()
            .or_else(|| question.correct_answer.as_deref().and_then(leading_letter))
            .unwrap_or_default();

        questions.push(FinalQuestion {
            record: question,
            section: Some(range_key),
            passage,
            answer_letter,
        });
    }

    if !missing_numbers.is_empty() {
        warnings.push(format!(
            "缺少 {} 道题目 {:?}，已插入 {} 占位",
            missing_numbers.len(),
            missing_numbers,
            MISSING_MARKER
        ));
    }
    if !missing_sections.is_empty() {
        let names: Vec<String> = missing_sections.keys().map(|key| key.canonical_name()).collect();
        warnings.push(format!("缺少板块原文: {}", names.join(", ")));
    }

    warnings.extend(validate(&metadata, &questions));

    for warning in &warnings {
        warn!("⚠️ {}", warning);
    }

    let final_record = FinalRecord {
        metadata,
        sections,
        questions,
        failed_segments: record.failed_segments,
        validation: ValidationReport { warnings },
    };

    info!(
        questions = final_record.questions.len(),
        placeholders = final_record.placeholder_count(),
        "✅ 补全完成"
    );

    final_record
}

/// 最终校验：数量、题号集合、重复、必填字段
fn validate(metadata: &ResolvedMetadata, questions: &[FinalQuestion]) -> Vec<String> {
    let mut warnings = Vec::new();

    if questions.len() != TOTAL_QUESTIONS as usize {
        warnings.push(format!("题目数量为 {}，应为 {}", questions.len(), TOTAL_QUESTIONS));
    }

    let numbers: Vec<u32> = questions.iter().map(|q| q.record.number).collect();
    let expected: Vec<u32> = (1..=TOTAL_QUESTIONS).collect();
    if numbers != expected {
        warnings.push("题号不是 1-52 的完整序列".to_string());
    }

    if metadata.year.is_empty() {
        warnings.push("缺少年份".to_string());
    }
    if metadata.exam_type.is_empty() {
        warnings.push("缺少考试类型".to_string());
    }

    for question in questions {
        let record = &question.record;
        let mut missing = Vec::new();
        if record.section_type().is_empty() {
            missing.push("题型");
        }
        if record.stem().is_empty() {
            missing.push("题干");
        }
        if question.passage.original_text.trim().is_empty() {
            missing.push("原文");
        }
        if !missing.is_empty() {
            warnings.push(format!("题目 {} 缺少字段: {}", record.number, missing.join("、")));
        }
    }

    warnings
}
