//! 各分段的提示词

use crate::config::SegmentTokenBudget;
use crate::types::{PromptVariant, SegmentId};

const ROLE: &str = "你是一个专业的考研英语真题文档分析工具。请分析下面的考研英语真题文档，按要求提取结构化信息。";

const JSON_ONLY: &str = "只返回JSON数据，不要包含任何解释或说明文字。确保JSON格式正确、结构完整。";

const METADATA_LAYOUT: &str = r#"  "metadata": {
    "year": "年份，如2024",
    "exam_type": "考试类型，如'英语（一）'"
  }"#;

const CLOZE_READING_LAYOUT: &str = r#"  "sections": {
    "cloze": {
      "original_text": "完形填空原文（卷面版本，包含[1], [2]等标记）",
      "restored_text": "完形填空原文（还原后版本，已将答案填入）",
      "answers_summary": "完形填空答案汇总，如'1.D 2.C 3.B...'"
    },
    "reading": {
      "text_1": {"original_text": "阅读Text 1原文", "answers_summary": "如'21.D 22.D 23.A...'"},
      "text_2": {"original_text": "阅读Text 2原文", "answers_summary": "阅读Text 2答案汇总"},
      "text_3": {"original_text": "阅读Text 3原文", "answers_summary": "阅读Text 3答案汇总"},
      "text_4": {"original_text": "阅读Text 4原文", "answers_summary": "阅读Text 4答案汇总"}
    }
  }"#;

const REMAINING_LAYOUT: &str = r#"  "sections": {
    "new_type": {
      "original_text": "新题型原文",
      "restored_text": "新题型还原后原文（没有则与原文相同）",
      "answers_summary": "新题型答案汇总，如'41.C 42.G...'"
    },
    "translation": {
      "original_text": "翻译题原文",
      "answers_summary": "无客观答案，填写'N/A'"
    },
    "writing": {
      "part_a": {"original_text": "写作A题目", "answers_summary": "N/A"},
      "part_b": {"original_text": "写作B题目", "answers_summary": "N/A"}
    }
  }"#;

const QUESTION_LAYOUT: &str = r#"  "questions": [
    {
      "number": 1,
      "section_type": "完形填空",
      "stem": "题干（完形填空通常为空或'/'）",
      "options": "A. Without, B. Though, C. Despite, D. Besides",
      "correct_answer": "A. Without",
      "distractor_options": "B. Though, C. Despite, D. Besides"
    }
  ]"#;

const SECTION_RULES: &str = "题型与题号对应关系：1-20 完形填空，21-25 阅读理解 Text 1，26-30 阅读理解 Text 2，\
31-35 阅读理解 Text 3，36-40 阅读理解 Text 4，41-45 新题型，46-50 翻译，51 写作A，52 写作B。";

const NO_PASSAGES_IN_QUESTIONS: &str = "题目中不要重复原文内容，原文只在 sections 中出现一次。";

fn layout(parts: &[&str]) -> String {
    format!("```json\n{{\n{}\n}}\n```", parts.join(",\n"))
}

fn question_range_prompt(first: u32, last: u32) -> String {
    format!(
        "{ROLE}\n\n# 任务\n只提取题号 {first} 到 {last} 的题目，共 {count} 道，不要提取原文、元数据或其他题号的题目。\n\
{SECTION_RULES}\n{NO_PASSAGES_IN_QUESTIONS}\n\n# 输出格式\n{layout}\n\n{JSON_ONLY}",
        count = last - first + 1,
        layout = layout(&[QUESTION_LAYOUT]),
    )
}

fn simplified_question_prompt(first: u32, last: u32) -> String {
    format!(
        "请从下面的考研英语真题文档中提取第 {first} 到第 {last} 题。\n\
以JSON返回：{{\"questions\": [{{\"number\": 题号, \"section_type\": \"题型\", \"stem\": \"题干\", \
\"options\": \"选项\", \"correct_answer\": \"正确答案\", \"distractor_options\": \"干扰选项\"}}]}}\n{JSON_ONLY}"
    )
}

/// 生成指定分段的提示词
pub fn prompt_for(segment: SegmentId, variant: PromptVariant) -> String {
    match (segment, variant) {
        (SegmentId::Full, _) => format!(
            "{ROLE}\n\n# 任务\n提取以下全部信息：\n1. 基本信息（年份、考试类型）\n2. 各部分题型的原文和答案汇总\n\
3. 全部 52 道题目的编号、题型、题干、选项、正确答案及干扰选项\n4. 完形填空和新题型的还原后原文\n\
{SECTION_RULES}\n{NO_PASSAGES_IN_QUESTIONS}\n\n# 输出格式\n{layout}\n\n{JSON_ONLY}",
            layout = layout(&[METADATA_LAYOUT, CLOZE_READING_LAYOUT, QUESTION_LAYOUT]),
        ),
        (SegmentId::MetaClozeReading, _) => format!(
            "{ROLE}\n\n# 任务\n只提取基本信息（年份、考试类型）、完形填空原文和阅读理解 Text 1-4 的原文及答案汇总。\
不要提取题目列表。\n\n# 输出格式\n{layout}\n\n{JSON_ONLY}",
            layout = layout(&[METADATA_LAYOUT, CLOZE_READING_LAYOUT]),
        ),
        (SegmentId::RemainingSections, _) => format!(
            "{ROLE}\n\n# 任务\n只提取新题型、翻译、写作A和写作B的原文及答案汇总。不要提取题目列表。\n\n\
# 输出格式\n{layout}\n\n{JSON_ONLY}",
            layout = layout(&[REMAINING_LAYOUT]),
        ),
        (segment, PromptVariant::Simplified) => {
            let range = segment.question_range().unwrap_or(1..=25);
            simplified_question_prompt(*range.start(), *range.end())
        }
        (segment, PromptVariant::Standard) => {
            let range = segment.question_range().unwrap_or(1..=25);
            question_range_prompt(*range.start(), *range.end())
        }
    }
}

/// 分段请求的 max_tokens，发送前还会被模型上限裁剪
pub fn max_tokens_for(segment: SegmentId, budget: &SegmentTokenBudget) -> u32 {
    match segment {
        SegmentId::Full => budget.full,
        SegmentId::MetaClozeReading | SegmentId::RemainingSections => budget.sections,
        _ => budget.questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;

    #[test]
    fn test_question_prompts_name_their_range() {
        let prompt = prompt_for(SegmentId::Q26To40, PromptVariant::Standard);
        assert!(prompt.contains("26 到 40"));
        assert!(prompt.contains("共 15 道"));

        let simplified = prompt_for(SegmentId::Q1To25, PromptVariant::Simplified);
        assert!(simplified.contains("第 1 到第 25 题"));
        assert!(simplified.len() < prompt_for(SegmentId::Q1To25, PromptVariant::Standard).len());
    }

    #[test]
    fn test_section_prompts_are_distinct() {
        let first = prompt_for(SegmentId::MetaClozeReading, PromptVariant::Standard);
        let second = prompt_for(SegmentId::RemainingSections, PromptVariant::Standard);

        assert!(first.contains("\"cloze\""));
        assert!(!first.contains("\"translation\""));
        assert!(second.contains("\"part_b\""));
        assert!(!second.contains("\"questions\""));
    }

    #[test]
    fn test_full_prompt_requests_all_questions() {
        let prompt = prompt_for(SegmentId::Full, PromptVariant::Standard);
        assert!(prompt.contains("52 道"));
        assert!(prompt.contains("\"metadata\""));
        assert!(prompt.contains("\"questions\""));
    }

    #[test]
    fn test_token_budget() {
        let budget = ExtractorConfig::default().llm.max_tokens;
        assert_eq!(max_tokens_for(SegmentId::Full, &budget), 30_000);
        assert_eq!(max_tokens_for(SegmentId::RemainingSections, &budget), 8192);
        assert_eq!(max_tokens_for(SegmentId::Q41To52, &budget), 8192);
    }
}
