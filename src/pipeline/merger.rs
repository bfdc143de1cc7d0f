//! # 分段合并
//!
//! 把五个分段的结果合并为一份尚未补全的记录。这里只做诊断，不修复缺号和重号，
//! 这两种情况由补全阶段处理。

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::types::{
    MISSING_MARKER, MergedRecord, ParsedSegmentResult, QuestionRecord, RecordOrigin, SectionKey,
    TOTAL_QUESTIONS,
};

/// 题目 1-25 分段整体缺失时补出的桩记录数
const BACKFILL_COUNT: u32 = 25;

/// 合并五个分段
///
/// 元数据取各分段中第一个非空值；板块先取分段 1，再用分段 2 按字段覆盖；
/// 题目按范围顺序拼接。
pub fn merge(
    first: ParsedSegmentResult,
    second: ParsedSegmentResult,
    questions_1_25: ParsedSegmentResult,
    questions_26_40: ParsedSegmentResult,
    questions_41_52: ParsedSegmentResult,
) -> MergedRecord {
    let mut metadata = first.metadata.clone();
    for segment in [&second, &questions_1_25, &questions_26_40, &questions_41_52] {
        metadata.fill_from(&segment.metadata);
    }

    let mut sections = first.sections;
    for (key, patch) in second.sections {
        sections.entry(key).or_default().overlay(patch);
    }

    let later_ranges_succeeded =
        !questions_26_40.questions.is_empty() || !questions_41_52.questions.is_empty();

    let mut questions = if questions_1_25.questions.is_empty() && later_ranges_succeeded {
        warn!("⚠️ 题目 1-{} 分段没有结果，已补出 {} 条桩记录", BACKFILL_COUNT, BACKFILL_COUNT);
        backfill_first_range()
    } else {
        questions_1_25.questions
    };
    questions.extend(questions_26_40.questions);
    questions.extend(questions_41_52.questions);

    finish(MergedRecord {
        metadata,
        sections,
        questions,
        failed_segments: Vec::new(),
    })
}

/// 单次提取的结果直接作为合并记录
pub fn from_single(result: ParsedSegmentResult) -> MergedRecord {
    finish(MergedRecord {
        metadata: result.metadata,
        sections: result.sections,
        questions: result.questions,
        failed_segments: Vec::new(),
    })
}

/// 生成题目 1-25 的桩记录，题型按题号范围确定，其余字段为缺失标记
fn backfill_first_range() -> Vec<QuestionRecord> {
    (1..=BACKFILL_COUNT)
        .map(|number| QuestionRecord {
            number,
            section_type: SectionKey::for_question(number).map(|key| key.canonical_name()),
            stem: Some(format!("{} 题号 {}（分段提取失败）", MISSING_MARKER, number)),
            options: Some(format!("{} 选项", MISSING_MARKER)),
            correct_answer: Some(format!("{} 正确答案", MISSING_MARKER)),
            distractor_options: Some(format!("{} 干扰选项", MISSING_MARKER)),
            origin: RecordOrigin::Backfilled,
        })
        .collect()
}

/// 按题号排序并记录缺号、重号
fn finish(mut record: MergedRecord) -> MergedRecord {
    record.questions.sort_by_key(|q| q.number);

    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for question in &record.questions {
        *counts.entry(question.number).or_default() += 1;
    }

    let missing: Vec<u32> = (1..=TOTAL_QUESTIONS).filter(|n| !counts.contains_key(n)).collect();
    let duplicates: Vec<u32> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(number, _)| *number)
        .collect();

    if !missing.is_empty() {
        warn!(count = missing.len(), "⚠️ 合并后缺少题号: {:?}", missing);
    }
    if !duplicates.is_empty() {
        warn!(count = duplicates.len(), "⚠️ 合并后存在重复题号: {:?}", duplicates);
    }

    info!(
        sections = record.sections.len(),
        questions = record.questions.len(),
        "合并完成"
    );

    record
}
