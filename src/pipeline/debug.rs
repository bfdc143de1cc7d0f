//! 调试文件输出
//!
//! 原始回复写入 `output_dir/debug/`，中间结果写入 `output_dir/analysis/`。
//! 文件名带毫秒时间戳和分段标识。写入失败只记录日志。

use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DebugSink {
    debug_dir: PathBuf,
    analysis_dir: PathBuf,
    enabled: bool,
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

impl DebugSink {
    pub fn new(output_dir: &Path, enabled: bool) -> Self {
        Self {
            debug_dir: output_dir.join("debug"),
            analysis_dir: output_dir.join("analysis"),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 保存模型原始回复
    pub async fn save_raw_reply(&self, label: &str, text: &str) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        let path = self.debug_dir.join(format!("raw_response_{}_{}.txt", label, timestamp()));
        self.write(path, text.as_bytes()).await
    }

    /// 保存中间结果，`kind` 如 segment、merged、final
    pub async fn save_json<T: Serialize>(&self, kind: &str, label: &str, value: &T) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        let body = match serde_json::to_vec_pretty(value) {
            Ok(body) => body,
            Err(e) => {
                warn!("❌ 调试数据序列化失败 ({}): {}", kind, e);
                return None;
            }
        };

        let path = self.analysis_dir.join(format!("{}_{}_{}.json", kind, label, timestamp()));
        self.write(path, &body).await
    }

    /// 保存最终提取结果 `extraction_result_<ts>.json`
    pub async fn save_extraction_result<T: Serialize>(&self, value: &T) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        let body = match serde_json::to_vec_pretty(value) {
            Ok(body) => body,
            Err(e) => {
                warn!("❌ 提取结果序列化失败: {}", e);
                return None;
            }
        };

        let path = self.analysis_dir.join(format!("extraction_result_{}.json", timestamp()));
        self.write(path, &body).await
    }

    async fn write(&self, path: PathBuf, body: &[u8]) -> Option<PathBuf> {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("❌ 无法创建调试目录 {}: {}", parent.display(), e);
                return None;
            }
        }

        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                debug!(path = %path.display(), "调试文件已保存");
                Some(path)
            }
            Err(e) => {
                warn!("❌ 调试文件写入失败 {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParsedSegmentResult, SegmentId};

    #[tokio::test]
    async fn test_writes_into_debug_and_analysis_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path(), true);

        let raw = sink.save_raw_reply(SegmentId::Q1To25.as_str(), "raw text").await.unwrap();
        assert!(raw.starts_with(dir.path().join("debug")));
        assert!(raw.file_name().unwrap().to_string_lossy().starts_with("raw_response_q1_25_"));
        assert_eq!(tokio::fs::read_to_string(&raw).await.unwrap(), "raw text");

        let parsed = sink
            .save_json("segment", SegmentId::Q1To25.as_str(), &ParsedSegmentResult::empty())
            .await
            .unwrap();
        assert!(parsed.starts_with(dir.path().join("analysis")));
    }

    #[tokio::test]
    async fn test_disabled_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path(), false);

        assert!(sink.save_raw_reply("full", "x").await.is_none());
        assert!(!dir.path().join("debug").exists());
    }
}
