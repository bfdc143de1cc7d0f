//! # 错误处理模块
//!
//! 定义了真题提取引擎中所有可能的错误类型，提供统一的错误处理接口。
//!
//! 注意：LLM 返回内容的解析错误、题目不完整等情况在管道内部被恢复，
//! 不会出现在这里；这里只包含会中断单个文档处理的错误，以及网关内部
//! 用来判断是否重试的 [`LlmError`]。

use thiserror::Error;

/// 提取引擎的结果类型
pub type ExtractResult<T> = Result<T, ExtractError>;

/// 提取引擎的主要错误类型
#[derive(Error, Debug)]
pub enum ExtractError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 文档读取错误
    #[error("Document error: {0}")]
    DocumentError(#[from] DocumentError),

    /// LLM 错误
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 导出错误
    #[error("Export error: {0}")]
    ExportError(#[from] ExportError),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O 错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 处理被取消
    #[error("Extraction cancelled")]
    Cancelled,

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// 文档读取相关错误
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Text decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Docx parsing failed: {0}")]
    DocxParseFailed(String),

    #[error("Document is empty: {path}")]
    Empty { path: String },
}

/// LLM 调用相关错误
///
/// 网关根据变体决定重试、降级为 Failure 还是直接向上返回。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API returned status {status}: {provider} - {body}")]
    ApiStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Request timed out: {provider}")]
    Timeout { provider: String },

    #[error("Malformed response: {provider} - {error}")]
    MalformedResponse { provider: String, error: String },

    #[error("Transport failure: {provider} - {error}")]
    Transport { provider: String, error: String },

    #[error("Missing API key for provider: {provider}")]
    MissingApiKey { provider: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("LLM call cancelled")]
    Cancelled,
}

/// 导出相关错误
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    CsvFailed(#[from] csv::Error),

    #[error("Invalid output path: {path}")]
    InvalidPath { path: String },
}

impl LlmError {
    /// 临时性错误：5xx、429、超时、响应体损坏、连接失败
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::ApiStatus { status, .. } => *status == 429 || *status >= 500,
            LlmError::Timeout { .. } => true,
            LlmError::MalformedResponse { .. } => true,
            LlmError::Transport { .. } => true,
            _ => false,
        }
    }

    /// 是否属于"预期内"的 API 错误
    ///
    /// 这类错误在重试耗尽后被降级为空结果，而不是中断整个文档。
    pub fn is_api_envelope(&self) -> bool {
        matches!(
            self,
            LlmError::ApiStatus { .. } | LlmError::Timeout { .. } | LlmError::MalformedResponse { .. }
        )
    }
}

impl ExtractError {
    /// 检查错误是否为临时性错误（可重试）
    pub fn is_retriable(&self) -> bool {
        match self {
            ExtractError::LlmError(e) => e.is_transient(),
            ExtractError::IoError(_) => true,
            _ => false,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            ExtractError::ConfigError(_) => "CONFIG_ERROR",
            ExtractError::DocumentError(_) => "DOCUMENT_ERROR",
            ExtractError::LlmError(_) => "LLM_ERROR",
            ExtractError::ExportError(_) => "EXPORT_ERROR",
            ExtractError::SerializationError(_) => "SERIALIZATION_ERROR",
            ExtractError::IoError(_) => "IO_ERROR",
            ExtractError::Cancelled => "CANCELLED",
            ExtractError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// 错误扩展 trait，为错误提供额外的上下文信息
pub trait ErrorExt {
    /// 添加上下文信息
    fn with_context(self, context: &str) -> ExtractError;
}

impl<E> ErrorExt for E
where
    E: Into<ExtractError>,
{
    fn with_context(self, context: &str) -> ExtractError {
        let error = self.into();
        ExtractError::InternalError(format!("{}: {}", context, error))
    }
}

/// 便捷宏，用于创建特定类型的错误
#[macro_export]
macro_rules! extract_error {
    (config, $msg:expr) => {
        $crate::error::ExtractError::ConfigError($msg.to_string())
    };
    (not_found, $path:expr) => {
        $crate::error::ExtractError::DocumentError($crate::error::DocumentError::FileNotFound {
            path: $path.to_string(),
        })
    };
    (internal, $msg:expr) => {
        $crate::error::ExtractError::InternalError($msg.to_string())
    };
}
