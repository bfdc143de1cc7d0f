//! # CSV 导出模块
//!
//! 每份文档输出一个 `<年份><考试类型>.csv`，固定 12 列、52 行。

pub mod sentences;

use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::OutputConfig;
use crate::error::{ExportError, ExtractResult};
use crate::types::{FinalQuestion, FinalRecord, MISSING_MARKER};

pub use sentences::split_sentences;

/// CSV 表头
pub const CSV_COLUMNS: [&str; 12] = [
    "年份",
    "考试类型",
    "题型",
    "原文（卷面）",
    "试卷答案",
    "题目编号",
    "题干",
    "选项",
    "正确答案",
    "原文（还原后）",
    "原文（句子拆解后）",
    "干扰选项",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// CSV 导出器
#[derive(Debug, Clone)]
pub struct CsvExporter {
    write_bom: bool,
    split_sentences: bool,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            write_bom: true,
            split_sentences: true,
        }
    }
}

impl CsvExporter {
    pub fn new(write_bom: bool, split_sentences: bool) -> Self {
        Self {
            write_bom,
            split_sentences,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.write_bom, config.split_sentences)
    }

    /// 输出文件名；年份和考试类型都为空时使用 `fallback_stem`
    pub fn file_name(record: &FinalRecord, fallback_stem: &str) -> String {
        let stem: String = format!("{}{}", record.metadata.year, record.metadata.exam_type)
            .chars()
            .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
            .collect();
        let stem = stem.trim();

        if stem.is_empty() {
            format!("{}.csv", fallback_stem)
        } else {
            format!("{}.csv", stem)
        }
    }

    fn row(&self, record: &FinalRecord, question: &FinalQuestion) -> [String; 12] {
        let passage = &question.passage;
        let sentence_source = if passage.restored_text.trim().is_empty() {
            &passage.original_text
        } else {
            &passage.restored_text
        };
        let sentence_column = if !self.split_sentences {
            String::new()
        } else if sentence_source.starts_with(MISSING_MARKER) {
            sentence_source.clone()
        } else {
            split_sentences(sentence_source)
        };

        let q = &question.record;
        [
            record.metadata.year.clone(),
            record.metadata.exam_type.clone(),
            q.section_type().to_string(),
            passage.original_text.clone(),
            question.answer_letter.clone(),
            q.number.to_string(),
            q.stem().to_string(),
            q.options().to_string(),
            q.correct_answer().to_string(),
            passage.restored_text.clone(),
            sentence_column,
            q.distractor_options().to_string(),
        ]
    }

    /// 生成 CSV 字节内容
    pub fn render(&self, record: &FinalRecord) -> ExtractResult<Vec<u8>> {
        let mut buffer = Vec::new();
        if self.write_bom {
            buffer.extend_from_slice(UTF8_BOM);
        }

        let mut writer = csv::Writer::from_writer(buffer);
        writer.write_record(CSV_COLUMNS).map_err(ExportError::from)?;
        for question in &record.questions {
            writer
                .write_record(self.row(record, question))
                .map_err(ExportError::from)?;
        }

        let buffer = writer
            .into_inner()
            .map_err(|e| ExportError::CsvFailed(csv::Error::from(e.into_error())))?;
        Ok(buffer)
    }

    /// 写入 `output_dir/<年份><考试类型>.csv`
    pub async fn export(&self, record: &FinalRecord, output_dir: &Path, fallback_stem: &str) -> ExtractResult<PathBuf> {
        if tokio::fs::metadata(output_dir).await.is_ok_and(|meta| !meta.is_dir()) {
            return Err(ExportError::InvalidPath {
                path: output_dir.display().to_string(),
            }
            .into());
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let path = output_dir.join(Self::file_name(record, fallback_stem));
        let body = self.render(record)?;
        tokio::fs::write(&path, body).await?;

        info!("💾 CSV 已保存: {} ({} 行)", path.display(), record.questions.len());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::completer;
    use crate::types::{MergedRecord, QuestionRecord, SectionKey, SectionPatch};

    fn sample_record(year: &str, exam_type: &str) -> FinalRecord {
        let mut merged = MergedRecord::default();
        merged.sections.insert(
            SectionKey::Cloze,
            SectionPatch {
                original_text: Some("Cloze __1__ text.".to_string()),
                restored_text: Some("Cloze first text. Second sentence here.".to_string()),
                answers_summary: Some("1.A".to_string()),
            },
        );
        let mut first = QuestionRecord::new(1);
        first.stem = Some("Choose the best word".to_string());
        first.options = Some("A. first, B. second".to_string());
        first.correct_answer = Some("A. first".to_string());
        first.distractor_options = Some("B. second".to_string());
        merged.questions.push(first);

        completer::complete(merged, Some(year), Some(exam_type))
    }

    fn read_rows(bytes: &[u8]) -> Vec<csv::StringRecord> {
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        csv::Reader::from_reader(body).records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_render_columns_and_rows() {
        let record = sample_record("2024", "英语（一）");
        let bytes = CsvExporter::default().render(&record).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let body = bytes.strip_prefix(UTF8_BOM).unwrap();
        let mut reader = csv::Reader::from_reader(body);
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_COLUMNS);

        let rows = read_rows(&bytes);
        assert_eq!(rows.len(), 52);

        let first = &rows[0];
        assert_eq!(&first[0], "2024");
        assert_eq!(&first[2], "完形填空");
        assert_eq!(&first[3], "Cloze __1__ text.");
        assert_eq!(&first[4], "A");
        assert_eq!(&first[5], "1");
        assert_eq!(&first[10], "[Sentence1]Cloze first text. [Sentence2]Second sentence here.");

        let last = &rows[51];
        assert_eq!(&last[5], "52");
        assert!(last[6].starts_with(MISSING_MARKER));
        assert!(last[10].starts_with(MISSING_MARKER));
    }

    #[test]
    fn test_sentence_column_can_be_disabled() {
        let record = sample_record("2024", "英语（一）");
        let bytes = CsvExporter::new(false, false).render(&record).unwrap();
        assert!(!bytes.starts_with(UTF8_BOM));
        assert_eq!(&read_rows(&bytes)[0][10], "");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(CsvExporter::file_name(&sample_record("2024", "英语（一）"), "exam"), "2024英语（一）.csv");
        assert_eq!(CsvExporter::file_name(&sample_record("", ""), "exam"), "exam.csv");
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record("2023", "英语（二）");

        let path = CsvExporter::default().export(&record, dir.path(), "exam").await.unwrap();
        assert_eq!(path, dir.path().join("2023英语（二）.csv"));

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(read_rows(&bytes).len(), 52);
    }

    #[tokio::test]
    async fn test_export_rejects_file_as_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        tokio::fs::write(&file, "x").await.unwrap();

        let result = CsvExporter::default().export(&sample_record("2024", "x"), &file, "exam").await;
        assert!(matches!(
            result,
            Err(crate::error::ExtractError::ExportError(ExportError::InvalidPath { .. }))
        ));
    }
}
