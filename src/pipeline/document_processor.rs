//! # 文档读取模块
//!
//! 把试卷文档转换为纯文本，支持 `.txt`、`.md` 和 `.docx`。
//! docx 只读取正文：段落按出现顺序输出，表格每行单元格以 " | " 连接，空段落跳过。

use async_trait::async_trait;
use docx_rs::{DocumentChild, ParagraphChild, RunChild, TableCellContent, TableChild, TableRowChild};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{DocumentError, ExtractResult};

/// 支持的文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Docx,
}

/// 读取后的文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub filename: String,
    pub format: DocumentFormat,
    pub content: String,
    pub char_count: usize,
}

/// 文档处理器 trait
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// 从字节数据提取文本
    async fn extract_text(&self, data: &[u8]) -> ExtractResult<String>;
}

/// 主文档处理器，按格式分派
pub struct MainDocumentProcessor {
    text_processor: TextProcessor,
    docx_processor: DocxProcessor,
}

impl Default for MainDocumentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MainDocumentProcessor {
    pub fn new() -> Self {
        Self {
            text_processor: TextProcessor,
            docx_processor: DocxProcessor,
        }
    }

    /// 读取文档
    pub async fn read(&self, path: &Path) -> ExtractResult<LoadedDocument> {
        let display = path.display().to_string();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DocumentError::FileNotFound { path: display }.into());
        }

        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let format = detect_format(&data, Some(&filename))?;

        info!("📄 开始读取文档: {} (格式: {:?})", filename, format);

        let content = self.get_processor(format).extract_text(&data).await?;
        if content.trim().is_empty() {
            return Err(DocumentError::Empty { path: display }.into());
        }

        let char_count = content.chars().count();
        info!("文档读取完成: {} 字符", char_count);

        Ok(LoadedDocument {
            filename,
            format,
            content,
            char_count,
        })
    }

    fn get_processor(&self, format: DocumentFormat) -> &dyn DocumentProcessor {
        match format {
            DocumentFormat::PlainText | DocumentFormat::Markdown => &self.text_processor,
            DocumentFormat::Docx => &self.docx_processor,
        }
    }
}

/// 检测文档格式：先看扩展名，再看文件头
pub fn detect_format(data: &[u8], filename: Option<&str>) -> ExtractResult<DocumentFormat> {
    if let Some(filename) = filename {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        if let Some(ext) = extension {
            match ext.as_str() {
                "txt" => return Ok(DocumentFormat::PlainText),
                "md" | "markdown" => return Ok(DocumentFormat::Markdown),
                "docx" => return Ok(DocumentFormat::Docx),
                other => {
                    return Err(DocumentError::UnsupportedFormat {
                        format: other.to_string(),
                    }
                    .into());
                }
            }
        }
    }

    // ZIP 文件头 (DOCX)
    if data.len() >= 4 && &data[0..4] == b"PK\x03\x04" {
        return Ok(DocumentFormat::Docx);
    }

    Ok(DocumentFormat::PlainText)
}

/// 纯文本 / Markdown 处理器
pub struct TextProcessor;

#[async_trait]
impl DocumentProcessor for TextProcessor {
    async fn extract_text(&self, data: &[u8]) -> ExtractResult<String> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| DocumentError::DecodeFailed(format!("UTF-8 解码失败: {}", e)))?;
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// DOCX 处理器
pub struct DocxProcessor;

fn paragraph_text(children: &[ParagraphChild]) -> String {
    let mut text = String::new();
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for run_child in &run.children {
                    match run_child {
                        RunChild::Text(t) => text.push_str(&t.text),
                        RunChild::Tab(_) => text.push('\t'),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => text.push_str(&paragraph_text(&link.children)),
            _ => {}
        }
    }
    text
}

fn table_lines(rows: &[TableChild], lines: &mut Vec<String>) {
    for row in rows {
        let TableChild::TableRow(row) = row else { continue };
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| {
                let TableRowChild::TableCell(cell) = cell else { return String::new() };
                cell.children
                    .iter()
                    .filter_map(|content| match content {
                        TableCellContent::Paragraph(p) => Some(paragraph_text(&p.children)),
                        _ => None,
                    })
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        if cells.iter().any(|cell| !cell.is_empty()) {
            lines.push(cells.join(" | "));
        }
    }
}

#[async_trait]
impl DocumentProcessor for DocxProcessor {
    async fn extract_text(&self, data: &[u8]) -> ExtractResult<String> {
        let docx = docx_rs::read_docx(data)
            .map_err(|e| DocumentError::DocxParseFailed(e.to_string()))?;

        let mut lines = Vec::new();
        for child in &docx.document.children {
            match child {
                DocumentChild::Paragraph(p) => {
                    let text = paragraph_text(&p.children);
                    if !text.trim().is_empty() {
                        lines.push(text.trim().to_string());
                    }
                }
                DocumentChild::Table(table) => table_lines(&table.rows, &mut lines),
                _ => {}
            }
        }

        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};

    fn build_docx() -> Vec<u8> {
        let table = Table::new(vec![TableRow::new(vec![
            TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("21"))),
            TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("[A]"))),
        ])]);

        let mut buffer = std::io::Cursor::new(Vec::new());
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("2024年全国硕士研究生招生考试")))
            .add_paragraph(Paragraph::new())
            .add_paragraph(
                Paragraph::new()
                    .add_run(Run::new().add_text("Section I "))
                    .add_run(Run::new().add_text("Use of English")),
            )
            .add_table(table)
            .build()
            .pack(&mut buffer)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"", Some("exam.TXT")).unwrap(), DocumentFormat::PlainText);
        assert_eq!(detect_format(b"", Some("exam.md")).unwrap(), DocumentFormat::Markdown);
        assert_eq!(detect_format(b"", Some("exam.docx")).unwrap(), DocumentFormat::Docx);
        assert_eq!(detect_format(b"PK\x03\x04rest", None).unwrap(), DocumentFormat::Docx);
        assert!(matches!(
            detect_format(b"", Some("exam.pdf")),
            Err(ExtractError::DocumentError(DocumentError::UnsupportedFormat { .. }))
        ));
    }

    #[tokio::test]
    async fn test_text_processor_strips_bom() {
        let text = TextProcessor.extract_text("\u{feff}Section I".as_bytes()).await.unwrap();
        assert_eq!(text, "Section I");
    }

    #[tokio::test]
    async fn test_docx_body_text() {
        let text = DocxProcessor.extract_text(&build_docx()).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec!["2024年全国硕士研究生招生考试", "Section I Use of English", "21 | [A]"]
        );
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let result = MainDocumentProcessor::new().read(Path::new("/nonexistent/exam.docx")).await;
        assert!(matches!(
            result,
            Err(ExtractError::DocumentError(DocumentError::FileNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.txt");
        tokio::fs::write(&path, "Section I Use of English").await.unwrap();

        let document = MainDocumentProcessor::new().read(&path).await.unwrap();
        assert_eq!(document.format, DocumentFormat::PlainText);
        assert_eq!(document.char_count, 24);
    }

    #[tokio::test]
    async fn test_read_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        tokio::fs::write(&path, "   \n").await.unwrap();

        let result = MainDocumentProcessor::new().read(&path).await;
        assert!(matches!(result, Err(ExtractError::DocumentError(DocumentError::Empty { .. }))));
    }
}
