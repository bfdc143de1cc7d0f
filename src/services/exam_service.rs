//! # 试卷提取服务
//!
//! 串联文档读取、提取管道和 CSV 导出，提供单文档与批量处理入口。

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExtractorConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::export::CsvExporter;
use crate::pipeline::document_processor::MainDocumentProcessor;
use crate::pipeline::{ExtractOptions, ExtractionPipeline, ExtractionPipelineBuilder};
use crate::types::SegmentId;

/// 单个文档的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub run_id: Uuid,
    pub source: PathBuf,
    pub success: bool,
    pub csv_path: Option<PathBuf>,
    pub elapsed_ms: u64,
    pub placeholder_count: usize,
    pub failed_segments: Vec<SegmentId>,
    pub warning_count: usize,
    pub error: Option<String>,
}

impl DocumentReport {
    fn failure(run_id: Uuid, source: &Path, started: Instant, error: &ExtractError) -> Self {
        Self {
            run_id,
            source: source.to_path_buf(),
            success: false,
            csv_path: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
            placeholder_count: 0,
            failed_segments: Vec::new(),
            warning_count: 0,
            error: Some(format!("[{}] {}", error.error_code(), error)),
        }
    }
}

/// 批量处理汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub reports: Vec<DocumentReport>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// 试卷提取服务
pub struct ExamService {
    config: Arc<ExtractorConfig>,
    pipeline: Arc<ExtractionPipeline>,
    reader: MainDocumentProcessor,
    exporter: CsvExporter,
}

impl ExamService {
    /// 按配置创建服务，LLM 客户端由工厂选择
    pub fn from_config(config: ExtractorConfig) -> ExtractResult<Self> {
        config.validate()?;
        let pipeline = ExtractionPipelineBuilder::new().with_config(config.clone()).build()?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: ExtractorConfig, pipeline: ExtractionPipeline) -> Self {
        let exporter = CsvExporter::from_config(&config.output);
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            reader: MainDocumentProcessor::new(),
            exporter,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// 处理单个文档：读取、提取、导出 CSV
    pub async fn process_document(
        &self,
        path: &Path,
        options: &ExtractOptions,
        cancel: &CancellationToken,
    ) -> ExtractResult<DocumentReport> {
        self.run_document(Uuid::new_v4(), path, options, cancel).await
    }

    async fn run_document(
        &self,
        run_id: Uuid,
        path: &Path,
        options: &ExtractOptions,
        cancel: &CancellationToken,
    ) -> ExtractResult<DocumentReport> {
        let started = Instant::now();
        info!(run_id = %run_id, "📄 处理文档: {}", path.display());

        let document = self.reader.read(path).await?;
        let record = self.pipeline.extract_with(&document.content, options, cancel).await?;

        let fallback_stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("exam");
        let csv_path = self.exporter.export(&record, &options.output_dir, fallback_stem).await?;

        let report = DocumentReport {
            run_id,
            source: path.to_path_buf(),
            success: true,
            csv_path: Some(csv_path),
            elapsed_ms: started.elapsed().as_millis() as u64,
            placeholder_count: record.placeholder_count(),
            failed_segments: record.failed_segments.clone(),
            warning_count: record.validation.warnings.len(),
            error: None,
        };

        info!(
            run_id = %run_id,
            elapsed_ms = report.elapsed_ms,
            placeholders = report.placeholder_count,
            "✅ 文档处理完成: {}",
            path.display()
        );
        Ok(report)
    }

    /// 批量处理目录中的文档，每个文档输出到 `output_dir/<完整文件名>/`
    ///
    /// 单个文档失败不会中断批量处理。
    pub async fn batch_process(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        options: &ExtractOptions,
        cancel: &CancellationToken,
    ) -> ExtractResult<BatchSummary> {
        let files = self.collect_documents(input_dir).await?;
        if files.is_empty() {
            warn!("⚠️ 目录中没有可处理的文档: {}", input_dir.display());
            return Ok(BatchSummary::default());
        }

        let concurrency = self.config.batch.max_concurrent_documents.max(1);
        info!("🚀 批量处理 {} 个文档 (并发 {})", files.len(), concurrency);

        let mut reports: Vec<DocumentReport> = stream::iter(files)
            .map(|path| {
                // 用完整文件名作目录，2020.docx 与 2020.txt 互不覆盖
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| "exam".to_string());
                let mut document_options = options.clone();
                document_options.output_dir = output_dir.join(file_name);

                async move {
                    let run_id = Uuid::new_v4();
                    let started = Instant::now();
                    match self.run_document(run_id, &path, &document_options, cancel).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(run_id = %run_id, "❌ 文档处理失败 {}: {}", path.display(), e);
                            DocumentReport::failure(run_id, &path, started, &e)
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        reports.sort_by(|a, b| a.source.cmp(&b.source));
        let summary = BatchSummary { reports };

        info!(
            "批量处理完成: {} 个成功, {} 个失败",
            summary.succeeded(),
            summary.failed()
        );
        Ok(summary)
    }

    /// 按配置的扩展名收集文档，跳过 Word 临时文件
    async fn collect_documents(&self, input_dir: &Path) -> ExtractResult<Vec<PathBuf>> {
        let extensions: Vec<String> = self
            .config
            .batch
            .file_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("~$") {
                continue;
            }

            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext.to_lowercase()));
            if matches_extension {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}
