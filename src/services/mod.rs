//! 服务层

pub mod exam_service;

pub use exam_service::{BatchSummary, DocumentReport, ExamService};
