//! # Exam Extractor
//!
//! 考研英语真题结构化提取引擎：把试卷文档交给大模型分段提取，
//! 修复并合并模型返回的 JSON，补全为固定的 52 道题，最后导出 CSV。
//!
//! ## 功能特性
//!
//! - 📄 读取 `.docx` / `.txt` / `.md` 试卷
//! - ✂️ 短文档单次提取，长文档或结果不完整时分五段提取
//! - 🩹 容错 JSON 解析 (代码块、注释、尾逗号、截断)
//! - 🧩 分段合并、缺题占位，保证每份试卷正好 52 行
//! - 🔁 可配置的重试策略与取消
//! - 📊 12 列 CSV 导出与批量处理
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use exam_extractor::{ExtractorConfig, ExtractionPipelineBuilder};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ExtractionPipelineBuilder::new()
//!         .with_config(ExtractorConfig::from_env()?)
//!         .build()?;
//!     let record = pipeline.extract("...", false, Path::new("output")).await?;
//!     assert_eq!(record.questions.len(), 52);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod export;
pub mod llm;
pub mod pipeline;
pub mod services;
pub mod types;

// 重新导出核心类型
pub use config::ExtractorConfig;
pub use error::{ExtractError, ExtractResult};
pub use export::CsvExporter;
pub use pipeline::{ExtractOptions, ExtractionPipeline, ExtractionPipelineBuilder};
pub use services::{BatchSummary, DocumentReport, ExamService};
pub use types::{FinalRecord, SegmentId, TOTAL_QUESTIONS};
