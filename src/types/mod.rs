//! # 核心类型定义模块
//!
//! 定义了提取引擎中使用的所有核心数据结构：分段标识、模型回复、
//! 分段解析结果、题目记录、原文板块以及最终的 52 题记录。
//!
//! LLM 返回的数据字段随时可能缺失，因此这里所有来自模型的字段都是
//! 显式的 `Option`，由访问方法给出默认值。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// 一套试卷的题目总数
pub const TOTAL_QUESTIONS: u32 = 52;

/// 缺失数据占位标记
pub const MISSING_MARKER: &str = "[缺失数据]";

/// 分段标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentId {
    /// 单次完整提取
    #[serde(rename = "full")]
    Full,
    /// 元数据 + 完形填空 + 阅读理解原文
    #[serde(rename = "meta_cloze_reading")]
    MetaClozeReading,
    /// 新题型 + 翻译 + 写作原文
    #[serde(rename = "remaining_sections")]
    RemainingSections,
    /// 题目 1-25
    #[serde(rename = "q1_25")]
    Q1To25,
    /// 题目 26-40
    #[serde(rename = "q26_40")]
    Q26To40,
    /// 题目 41-52
    #[serde(rename = "q41_52")]
    Q41To52,
}

impl SegmentId {
    /// 多段提取的固定顺序
    pub const MULTI_SEGMENT: [SegmentId; 5] = [
        SegmentId::MetaClozeReading,
        SegmentId::RemainingSections,
        SegmentId::Q1To25,
        SegmentId::Q26To40,
        SegmentId::Q41To52,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentId::Full => "full",
            SegmentId::MetaClozeReading => "meta_cloze_reading",
            SegmentId::RemainingSections => "remaining_sections",
            SegmentId::Q1To25 => "q1_25",
            SegmentId::Q26To40 => "q26_40",
            SegmentId::Q41To52 => "q41_52",
        }
    }

    /// 在多段流程中的序号 (1-5)，完整提取为 0
    pub fn ordinal(&self) -> usize {
        match self {
            SegmentId::Full => 0,
            SegmentId::MetaClozeReading => 1,
            SegmentId::RemainingSections => 2,
            SegmentId::Q1To25 => 3,
            SegmentId::Q26To40 => 4,
            SegmentId::Q41To52 => 5,
        }
    }

    /// 中文描述，用于日志
    pub fn description(&self) -> &'static str {
        match self {
            SegmentId::Full => "完整提取",
            SegmentId::MetaClozeReading => "元数据+完形填空+阅读理解",
            SegmentId::RemainingSections => "新题型+翻译+写作",
            SegmentId::Q1To25 => "题目1-25",
            SegmentId::Q26To40 => "题目26-40",
            SegmentId::Q41To52 => "题目41-52",
        }
    }

    /// 该分段负责的题号范围
    pub fn question_range(&self) -> Option<RangeInclusive<u32>> {
        match self {
            SegmentId::Full => Some(1..=TOTAL_QUESTIONS),
            SegmentId::Q1To25 => Some(1..=25),
            SegmentId::Q26To40 => Some(26..=40),
            SegmentId::Q41To52 => Some(41..=52),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 提示词版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    Standard,
    /// 更短的提示词，用于题目分段返回为空后的重试
    Simplified,
}

/// 单次 LLM 调用的请求
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub document_text: &'a str,
    pub segment: SegmentId,
    pub variant: PromptVariant,
}

impl<'a> ExtractionRequest<'a> {
    pub fn new(document_text: &'a str, segment: SegmentId) -> Self {
        Self {
            document_text,
            segment,
            variant: PromptVariant::Standard,
        }
    }

    pub fn simplified(self) -> Self {
        Self {
            variant: PromptVariant::Simplified,
            ..self
        }
    }
}

/// 模型的原始回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawModelReply {
    pub text: String,
    pub elapsed_ms: u64,
}

/// 试卷元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
    /// 考试年份，如 "2024"
    pub year: Option<String>,
    /// 考试类型，如 "英语（一）"
    pub exam_type: Option<String>,
}

impl ExamMetadata {
    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.exam_type.is_none()
    }

    /// 用另一份元数据补齐缺失字段，已有的值不覆盖
    pub fn fill_from(&mut self, other: &ExamMetadata) {
        if self.year.is_none() {
            self.year = other.year.clone();
        }
        if self.exam_type.is_none() {
            self.exam_type = other.exam_type.clone();
        }
    }
}

/// 试卷板块
///
/// 序列化为规范中文名称，便于作为 JSON 对象的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKey {
    Cloze,
    /// 阅读理解 Text 1-4
    Reading(u8),
    NewType,
    Translation,
    WritingA,
    WritingB,
}

impl SectionKey {
    pub const ALL: [SectionKey; 9] = [
        SectionKey::Cloze,
        SectionKey::Reading(1),
        SectionKey::Reading(2),
        SectionKey::Reading(3),
        SectionKey::Reading(4),
        SectionKey::NewType,
        SectionKey::Translation,
        SectionKey::WritingA,
        SectionKey::WritingB,
    ];

    /// 规范名称
    pub fn canonical_name(&self) -> String {
        match self {
            SectionKey::Cloze => "完形填空".to_string(),
            SectionKey::Reading(n) => format!("阅读理解 Text {}", n),
            SectionKey::NewType => "新题型".to_string(),
            SectionKey::Translation => "翻译".to_string(),
            SectionKey::WritingA => "写作A".to_string(),
            SectionKey::WritingB => "写作B".to_string(),
        }
    }

    /// 板块覆盖的题号范围
    pub fn question_range(&self) -> RangeInclusive<u32> {
        match self {
            SectionKey::Cloze => 1..=20,
            SectionKey::Reading(n) => {
                let start = 21 + (*n as u32 - 1) * 5;
                start..=start + 4
            }
            SectionKey::NewType => 41..=45,
            SectionKey::Translation => 46..=50,
            SectionKey::WritingA => 51..=51,
            SectionKey::WritingB => 52..=52,
        }
    }

    /// 根据题号确定板块
    pub fn for_question(number: u32) -> Option<SectionKey> {
        Self::ALL
            .into_iter()
            .find(|key| key.question_range().contains(&number))
    }

    /// 从各种别名识别板块
    ///
    /// 支持 "cloze"、"完型填空"、"阅读 Text 1"、"Reading Text 1"、"reading.text_1"、
    /// "new_type"、"translation"、"writing.part_a"、"写作B"、"小作文" 等写法。
    /// 不带编号的 "阅读理解" 视为 Text 1。
    pub fn from_alias(alias: &str) -> Option<SectionKey> {
        let s = alias.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }

        if s.contains("cloze") || s.contains("完形") || s.contains("完型") {
            return Some(SectionKey::Cloze);
        }

        if s.contains("writing") || s.contains("写作") || s.contains("作文") {
            if s.contains("小作文") || s.ends_with('a') || s.contains("part a") {
                return Some(SectionKey::WritingA);
            }
            if s.contains("大作文") || s.ends_with('b') || s.contains("part b") {
                return Some(SectionKey::WritingB);
            }
            return None;
        }

        if s.contains("新题型") || s.contains("new_type") || s.contains("new type") || s.contains("newtype") {
            return Some(SectionKey::NewType);
        }

        if s.contains("翻译") || s.contains("transl") {
            return Some(SectionKey::Translation);
        }

        if s.contains("阅读") || s.contains("reading") || s.contains("text") {
            let digit = s
                .chars()
                .filter_map(|c| c.to_digit(10))
                .find(|d| (1..=4).contains(d));
            return match digit {
                Some(d) => Some(SectionKey::Reading(d as u8)),
                None if s.chars().any(|c| c.is_ascii_digit()) => None,
                None => Some(SectionKey::Reading(1)),
            };
        }

        None
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

impl Serialize for SectionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical_name())
    }
}

impl<'de> Deserialize<'de> for SectionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        SectionKey::from_alias(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown section: {}", name)))
    }
}

/// 分段结果中某个板块的局部数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionPatch {
    pub original_text: Option<String>,
    pub restored_text: Option<String>,
    pub answers_summary: Option<String>,
}

impl SectionPatch {
    pub fn is_empty(&self) -> bool {
        self.original_text.is_none() && self.restored_text.is_none() && self.answers_summary.is_none()
    }

    /// 浅合并：`other` 中有值的字段覆盖当前字段
    pub fn overlay(&mut self, other: SectionPatch) {
        if other.original_text.is_some() {
            self.original_text = other.original_text;
        }
        if other.restored_text.is_some() {
            self.restored_text = other.restored_text;
        }
        if other.answers_summary.is_some() {
            self.answers_summary = other.answers_summary;
        }
    }
}

/// 题目记录的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// 模型实际返回
    #[default]
    Extracted,
    /// 分段整体失败后按模板补出的桩记录
    Backfilled,
    /// 补全阶段插入的缺失占位
    Placeholder,
}

/// 单道题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub number: u32,
    pub section_type: Option<String>,
    pub stem: Option<String>,
    pub options: Option<String>,
    pub correct_answer: Option<String>,
    pub distractor_options: Option<String>,
    #[serde(default)]
    pub origin: RecordOrigin,
}

impl QuestionRecord {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            section_type: None,
            stem: None,
            options: None,
            correct_answer: None,
            distractor_options: None,
            origin: RecordOrigin::Extracted,
        }
    }

    /// 缺失题目的占位记录，题型由题号范围决定
    pub fn placeholder(number: u32) -> Self {
        let section_type = SectionKey::for_question(number)
            .map(|key| key.canonical_name())
            .unwrap_or_else(|| "未知题型".to_string());

        Self {
            number,
            section_type: Some(section_type),
            stem: Some(format!("{} 题号 {}", MISSING_MARKER, number)),
            options: Some(format!("{} 选项", MISSING_MARKER)),
            correct_answer: Some(format!("{} 正确答案", MISSING_MARKER)),
            distractor_options: Some(format!("{} 干扰选项", MISSING_MARKER)),
            origin: RecordOrigin::Placeholder,
        }
    }

    pub fn section_type(&self) -> &str {
        self.section_type.as_deref().unwrap_or("")
    }

    pub fn stem(&self) -> &str {
        self.stem.as_deref().unwrap_or("")
    }

    pub fn options(&self) -> &str {
        self.options.as_deref().unwrap_or("")
    }

    pub fn correct_answer(&self) -> &str {
        self.correct_answer.as_deref().unwrap_or("")
    }

    pub fn distractor_options(&self) -> &str {
        self.distractor_options.as_deref().unwrap_or("")
    }

    /// 有内容的字段数，用于在重复题号之间挑选更完整的一条
    pub fn filled_field_count(&self) -> usize {
        [
            &self.section_type,
            &self.stem,
            &self.options,
            &self.correct_answer,
            &self.distractor_options,
        ]
        .iter()
        .filter(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
        .count()
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin != RecordOrigin::Extracted || self.stem().starts_with(MISSING_MARKER)
    }
}

/// 单个分段经过规范化后的结果
///
/// 解析失败时各容器为空，`unparsed_reply` 保留原始回复用于排查。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedSegmentResult {
    pub metadata: ExamMetadata,
    pub sections: BTreeMap<SectionKey, SectionPatch>,
    pub questions: Vec<QuestionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unparsed_reply: Option<String>,
}

impl ParsedSegmentResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 所有解析手段均失败
    pub fn failed(raw_text: impl Into<String>) -> Self {
        Self {
            unparsed_reply: Some(raw_text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.sections.is_empty() && self.questions.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.unparsed_reply.is_some()
    }
}

/// 合并后、补全前的记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub metadata: ExamMetadata,
    pub sections: BTreeMap<SectionKey, SectionPatch>,
    pub questions: Vec<QuestionRecord>,
    pub failed_segments: Vec<SegmentId>,
}

/// 板块原文，被该板块的所有题目共享
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionText {
    /// 原文（卷面）
    pub original_text: String,
    /// 原文（还原后）
    pub restored_text: String,
    /// 答案汇总
    pub answers_summary: String,
}

/// 已确定的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub year: String,
    pub exam_type: String,
}

/// 最终记录中的题目：题目本身 + 共享原文 + 单字母答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalQuestion {
    #[serde(flatten)]
    pub record: QuestionRecord,
    pub section: Option<SectionKey>,
    pub passage: Arc<SectionText>,
    /// 试卷答案，如 "A"
    pub answer_letter: String,
}

/// 校验报告，只记录不阻断
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// 最终输出的完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub metadata: ResolvedMetadata,
    pub sections: BTreeMap<SectionKey, Arc<SectionText>>,
    pub questions: Vec<FinalQuestion>,
    pub failed_segments: Vec<SegmentId>,
    pub validation: ValidationReport,
}

impl FinalRecord {
    pub fn question(&self, number: u32) -> Option<&FinalQuestion> {
        self.questions.iter().find(|q| q.record.number == number)
    }

    /// 占位或补出的题目数量，调用方据此判断提取质量
    pub fn placeholder_count(&self) -> usize {
        self.questions.iter().filter(|q| q.record.is_placeholder()).count()
    }
}
