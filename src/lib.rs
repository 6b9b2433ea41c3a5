//! # Scanalyze
//!
//! 检验报告录入与派生指标计算，汇总核心模型与检验模块

pub use scanalyze_core::{Gender, PatientContext, PatientRecord, Result, ScanalyzeError};
pub use scanalyze_lab::{SubmissionPayload, TestCatalog, TestEntrySession};
