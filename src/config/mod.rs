//! # 配置模块
//!
//! 负责管理提取引擎的所有配置，支持多种配置源：
//! - 配置文件 (TOML)
//! - 环境变量 (`EXAM_` 前缀，`__` 表示嵌套)
//! - 命令行参数

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use figment::{Figment, providers::{Format, Toml, Env, Serialized}};
use crate::error::{ExtractError, ExtractResult};

/// 提取引擎主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// 应用配置
    pub app: AppConfig,
    /// LLM 配置
    pub llm: LlmConfig,
    /// 模型输出上限表
    pub models: ModelsConfig,
    /// 重试策略
    pub retry: RetryConfig,
    /// 分段配置
    pub segmentation: SegmentationConfig,
    /// 输出配置
    pub output: OutputConfig,
    /// 批处理配置
    pub batch: BatchConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用名称
    pub name: String,
    /// 应用版本
    pub version: String,
    /// 运行环境 (development, production)
    pub environment: String,
}

/// LLM 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// 提供商 (openrouter, openai, anthropic)
    pub provider: String,
    /// 模型名称
    pub model: String,
    /// API 密钥
    pub api_key: Option<String>,
    /// 自定义 API 地址
    pub base_url: Option<String>,
    /// 生成温度
    pub temperature: f32,
    /// 单次请求超时时间 (秒)
    pub timeout_seconds: u64,
    /// OpenRouter 的 HTTP-Referer 头
    pub app_url: Option<String>,
    /// 各分段请求的 max_tokens
    pub max_tokens: SegmentTokenBudget,
}

/// 各分段请求的 max_tokens，实际值还会被模型上限裁剪
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentTokenBudget {
    /// 单次完整提取
    pub full: u32,
    /// 原文分段 (元数据/完形/阅读，剩余题型)
    pub sections: u32,
    /// 题目分段
    pub questions: u32,
}

/// 模型输出上限配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// 未登记模型的默认上限
    pub default_max_tokens: u32,
    /// 模型名 -> 最大输出 token 数
    pub ceilings: BTreeMap<String, u32>,
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 两次尝试之间的固定间隔 (秒)
    pub delay_seconds: u64,
}

/// 分段配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// 超过该字符数直接使用多段提取
    pub single_shot_max_chars: usize,
    /// 题目分段 1-25 为空时是否使用简化提示词重试
    pub simplified_retry: bool,
}

/// 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// 默认输出目录
    pub dir: String,
    /// 保存调试文件
    pub save_debug: bool,
    /// 生成 "原文（句子拆解后）" 列
    pub split_sentences: bool,
    /// CSV 写入 UTF-8 BOM
    pub write_bom: bool,
}

/// 批处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// 同时处理的文档数
    pub max_concurrent_documents: usize,
    /// 处理的文件扩展名
    pub file_extensions: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式 (json, pretty)
    pub format: String,
}

impl ExtractorConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> ExtractResult<Self> {
        let config = Figment::from(Serialized::defaults(ExtractorConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("EXAM_").split("__"))
            .extract()
            .map_err(|e| ExtractError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> ExtractResult<Self> {
        let config = Figment::from(Serialized::defaults(ExtractorConfig::default()))
            .merge(Env::prefixed("EXAM_").split("__"))
            .extract()
            .map_err(|e| ExtractError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> ExtractResult<()> {
        if self.llm.model.trim().is_empty() {
            return Err(ExtractError::ConfigError("Model name cannot be empty".to_string()));
        }

        if !matches!(self.llm.provider.as_str(), "openrouter" | "openai" | "anthropic") {
            return Err(ExtractError::ConfigError(format!(
                "Unsupported LLM provider: {}",
                self.llm.provider
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ExtractError::ConfigError("Temperature must be within 0.0..=2.0".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ExtractError::ConfigError("Retry attempts must be greater than 0".to_string()));
        }

        if self.segmentation.single_shot_max_chars == 0 {
            return Err(ExtractError::ConfigError("Single-shot threshold must be greater than 0".to_string()));
        }

        if self.batch.max_concurrent_documents == 0 {
            return Err(ExtractError::ConfigError("Batch concurrency must be greater than 0".to_string()));
        }

        if let Some(base_url) = &self.llm.base_url {
            url::Url::parse(base_url)
                .map_err(|e| ExtractError::ConfigError(format!("Invalid base_url '{}': {}", base_url, e)))?;
        }

        Ok(())
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let ceilings = [
            ("anthropic/claude-3.7-sonnet", 200_000),
            ("anthropic/claude-3.5-haiku", 8192),
            ("anthropic/claude-3-opus", 100_000),
            ("anthropic/claude-3.5-sonnet", 15_000),
            ("claude-3-7-sonnet-20250219", 200_000),
            ("claude-3-5-haiku-20241022", 8192),
            ("claude-3-opus-20240229", 100_000),
            ("claude-3-5-sonnet-20241022", 15_000),
            ("claude-3-5-sonnet-20240620", 15_000),
            ("claude-3-haiku-20240307", 8192),
        ]
        .into_iter()
        .map(|(name, max)| (name.to_string(), max))
        .collect();

        Self {
            app: AppConfig {
                name: "exam-extractor".to_string(),
                version: "0.1.0".to_string(),
                environment: "development".to_string(),
            },
            llm: LlmConfig {
                provider: "openrouter".to_string(),
                model: "anthropic/claude-3.5-haiku".to_string(),
                api_key: None,
                base_url: None,
                temperature: 0.1,
                timeout_seconds: 300,
                app_url: None,
                max_tokens: SegmentTokenBudget {
                    full: 30_000,
                    sections: 8192,
                    questions: 8192,
                },
            },
            models: ModelsConfig {
                default_max_tokens: 8000,
                ceilings,
            },
            retry: RetryConfig {
                max_attempts: 3,
                delay_seconds: 5,
            },
            segmentation: SegmentationConfig {
                single_shot_max_chars: 3000,
                simplified_retry: true,
            },
            output: OutputConfig {
                dir: "test_results".to_string(),
                save_debug: false,
                split_sentences: true,
                write_bom: true,
            },
            batch: BatchConfig {
                max_concurrent_documents: num_cpus::get().max(1),
                file_extensions: vec!["docx".to_string(), "txt".to_string()],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExtractorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segmentation.single_shot_max_chars, 3000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExtractorConfig::default();
        config.llm.provider = "cohere".to_string();
        assert!(config.validate().is_err());

        let mut config = ExtractorConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ExtractorConfig::default();
        config.llm.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "anthropic"
model = "claude-3-5-haiku-20241022"

[retry]
max_attempts = 5
delay_seconds = 1
"#
        )
        .unwrap();

        let config = ExtractorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.segmentation.single_shot_max_chars, 3000);
    }
}
