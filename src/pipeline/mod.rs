//! # 提取管道模块
//!
//! 整合分段规划、LLM 调用、回复规范化、分段合并与补全的完整流程：
//!
//! ```text
//! 文档文本 → 规划 → 网关 (每个分段) → 规范化 → 合并 → 补全 → FinalRecord
//! ```
//!
//! 同一文档内的请求严格依次发送。

pub mod completer;
pub mod debug;
pub mod document_processor;
pub mod json_repair;
pub mod merger;
pub mod normalizer;
pub mod planner;
pub mod prompts;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ExtractorConfig, SegmentTokenBudget};
use crate::error::{ExtractError, ExtractResult, LlmError};
use crate::llm::{GatewayOutcome, LlmClient, LlmClientFactory, LlmGateway, ModelCatalog, RetryPolicy};
use crate::types::{ExtractionRequest, FinalRecord, MergedRecord, ParsedSegmentResult, PromptVariant, SegmentId};

use debug::DebugSink;
use planner::ExtractionMode;

/// 管道运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub single_shot_max_chars: usize,
    pub simplified_retry: bool,
    pub token_budget: SegmentTokenBudget,
    pub temperature: f32,
}

impl PipelineSettings {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            single_shot_max_chars: config.segmentation.single_shot_max_chars,
            simplified_retry: config.segmentation.simplified_retry,
            token_budget: config.llm.max_tokens.clone(),
            temperature: config.llm.temperature,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&ExtractorConfig::default())
    }
}

/// 单个文档的提取选项
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub save_debug: bool,
    pub output_dir: PathBuf,
    /// 指定年份，优先于模型提取的值
    pub year: Option<String>,
    /// 指定考试类型，优先于模型提取的值
    pub exam_type: Option<String>,
}

impl ExtractOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_debug(mut self, save_debug: bool) -> Self {
        self.save_debug = save_debug;
        self
    }

    pub fn with_year(mut self, year: Option<String>) -> Self {
        self.year = year;
        self
    }

    pub fn with_exam_type(mut self, exam_type: Option<String>) -> Self {
        self.exam_type = exam_type;
        self
    }
}

/// 单个分段的执行结果
struct SegmentRun {
    result: ParsedSegmentResult,
    failed: bool,
}

impl SegmentRun {
    fn failed() -> Self {
        Self {
            result: ParsedSegmentResult::empty(),
            failed: true,
        }
    }
}

/// 提取管道
pub struct ExtractionPipeline {
    gateway: LlmGateway,
    settings: PipelineSettings,
}

impl ExtractionPipeline {
    pub fn new(gateway: LlmGateway, settings: PipelineSettings) -> Self {
        Self { gateway, settings }
    }

    /// 提取一份文档
    pub async fn extract(&self, document_text: &str, save_debug: bool, output_dir: &Path) -> ExtractResult<FinalRecord> {
        let options = ExtractOptions::new(output_dir).with_debug(save_debug);
        self.extract_with(document_text, &options, &CancellationToken::new()).await
    }

    /// 带选项和取消信号的提取
    ///
    /// 只有配置错误 (缺少密钥、不支持的提供商) 和取消会返回错误；
    /// 其余情况总是返回 52 道题的完整记录。
    pub async fn extract_with(
        &self,
        document_text: &str,
        options: &ExtractOptions,
        cancel: &CancellationToken,
    ) -> ExtractResult<FinalRecord> {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let sink = DebugSink::new(&options.output_dir, options.save_debug);
        let char_count = document_text.chars().count();
        let mode = planner::initial_mode(document_text, self.settings.single_shot_max_chars);

        info!(chars = char_count, mode = ?mode, model = %self.gateway.model(), "🚀 开始提取");
        if sink.is_enabled() {
            info!("调试模式: 原始回复与中间结果保存到 {}", options.output_dir.display());
        }

        let mut merged = None;
        if mode == ExtractionMode::SingleShot {
            let run = self
                .run_segment(ExtractionRequest::new(document_text, SegmentId::Full), &sink, cancel)
                .await?;

            if planner::needs_escalation(&run.result) {
                info!(
                    questions = run.result.questions.len(),
                    "单次提取题目不足 52 道，改用多段提取"
                );
            } else {
                merged = Some(merger::from_single(run.result));
            }
        }

        let merged = match merged {
            Some(record) => record,
            None => self.run_multi_segment(document_text, &sink, cancel).await?,
        };

        sink.save_json("merged", "record", &merged).await;

        let failed_segments = merged.failed_segments.clone();
        let mut record = completer::complete(merged, options.year.as_deref(), options.exam_type.as_deref());

        let mut warnings: Vec<String> = failed_segments
            .iter()
            .map(|segment| {
                format!(
                    "分段 {} ({}, {}) 提取失败，已按空结果处理",
                    segment.ordinal(),
                    segment.as_str(),
                    segment.description()
                )
            })
            .collect();
        for warning in &warnings {
            warn!("⚠️ {}", warning);
        }
        warnings.append(&mut record.validation.warnings);
        record.validation.warnings = warnings;

        sink.save_json("final", "record", &record).await;
        sink.save_extraction_result(&record).await;

        info!(
            questions = record.questions.len(),
            placeholders = record.placeholder_count(),
            failed_segments = record.failed_segments.len(),
            "✅ 提取完成"
        );

        Ok(record)
    }

    async fn run_multi_segment(
        &self,
        document_text: &str,
        sink: &DebugSink,
        cancel: &CancellationToken,
    ) -> ExtractResult<MergedRecord> {
        let mut results = Vec::with_capacity(SegmentId::MULTI_SEGMENT.len());
        let mut failed_segments = Vec::new();

        for segment in SegmentId::MULTI_SEGMENT {
            info!(
                segment = %segment,
                "🔧 分段 {}/5: {}",
                segment.ordinal(),
                segment.description()
            );

            let request = ExtractionRequest::new(document_text, segment);
            let mut run = self.run_segment(request, sink, cancel).await?;

            if segment == SegmentId::Q1To25 && run.result.questions.is_empty() && self.settings.simplified_retry {
                info!("题目 1-25 没有结果，使用简化提示词重试");
                run = self.run_segment(request.simplified(), sink, cancel).await?;
                if run.result.questions.is_empty() {
                    run.failed = true;
                }
            }

            if run.failed {
                failed_segments.push(segment);
            }
            results.push(run.result);
        }

        let mut results = results.into_iter();
        let mut next = || results.next().unwrap_or_default();
        let (first, second, q1, q2, q3) = (next(), next(), next(), next(), next());

        let mut merged = merger::merge(first, second, q1, q2, q3);
        merged.failed_segments = failed_segments;
        Ok(merged)
    }

    /// 执行一个分段：调用网关、保存原始回复、规范化
    async fn run_segment(
        &self,
        request: ExtractionRequest<'_>,
        sink: &DebugSink,
        cancel: &CancellationToken,
    ) -> ExtractResult<SegmentRun> {
        let label = match request.variant {
            PromptVariant::Standard => request.segment.as_str().to_string(),
            PromptVariant::Simplified => format!("{}_simplified", request.segment.as_str()),
        };
        let prompt = prompts::prompt_for(request.segment, request.variant);
        let max_tokens = prompts::max_tokens_for(request.segment, &self.settings.token_budget);

        let outcome = self
            .gateway
            .call(&prompt, request.document_text, max_tokens, self.settings.temperature, cancel)
            .await;

        let reply = match outcome {
            Ok(GatewayOutcome::Reply(reply)) => reply,
            Ok(GatewayOutcome::Failure { attempts, last_error }) => {
                warn!(segment = %label, attempts, "❌ 分段请求失败: {}", last_error);
                return Ok(SegmentRun::failed());
            }
            Err(LlmError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(e @ (LlmError::MissingApiKey { .. } | LlmError::UnsupportedProvider { .. })) => {
                return Err(e.into());
            }
            Err(e) => {
                warn!(segment = %label, "❌ 分段请求异常，按空结果处理: {}", e);
                return Ok(SegmentRun::failed());
            }
        };

        sink.save_raw_reply(&label, &reply.text).await;

        let result = normalizer::normalize(&reply.text);
        sink.save_json("segment", &label, &result).await;

        let failed = result.is_failed() || result.is_empty();
        if failed {
            warn!(segment = %label, "⚠️ 分段回复为空或无法解析");
        }

        Ok(SegmentRun { result, failed })
    }
}

/// 提取管道构建器
pub struct ExtractionPipelineBuilder {
    config: ExtractorConfig,
    client: Option<Arc<dyn LlmClient>>,
    retry_policy: Option<RetryPolicy>,
}

impl Default for ExtractionPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: ExtractorConfig::default(),
            client: None,
            retry_policy: None,
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// 使用指定的客户端，不再通过工厂创建
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> ExtractResult<ExtractionPipeline> {
        let client = match self.client {
            Some(client) => client,
            None => LlmClientFactory::create(&self.config.llm)?,
        };

        let retry = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.retry));
        let gateway = LlmGateway::new(
            client,
            self.config.llm.model.clone(),
            ModelCatalog::from_config(&self.config.models),
            retry,
        );

        Ok(ExtractionPipeline::new(gateway, PipelineSettings::from_config(&self.config)))
    }
}
