//! 分段规划

use serde::{Deserialize, Serialize};

use crate::types::{ParsedSegmentResult, TOTAL_QUESTIONS};

/// 提取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// 一次请求提取全部内容
    SingleShot,
    /// 五个分段依次请求
    MultiSegment,
}

/// 文档字符数超过阈值时直接使用多段提取
pub fn initial_mode(document_text: &str, single_shot_max_chars: usize) -> ExtractionMode {
    if document_text.chars().count() > single_shot_max_chars {
        ExtractionMode::MultiSegment
    } else {
        ExtractionMode::SingleShot
    }
}

/// 单次提取的题目不足 52 道时需要升级为多段提取
pub fn needs_escalation(result: &ParsedSegmentResult) -> bool {
    result.questions.len() < TOTAL_QUESTIONS as usize
}
