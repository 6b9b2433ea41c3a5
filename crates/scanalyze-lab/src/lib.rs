//! # Scanalyze检验模块
//!
//! 提供检验结果录入与计算功能，包括：
//! - 参考范围判定：按单一范围、性别分组或临床分类判断结果
//! - 派生指标计算：eGFR、MCV、FIB-4 等公式
//! - 检验目录：按分类组织的检验项目定义
//! - 录入会话：数值变化时级联重算派生项目
//! - 提交报文与带重试的提交器

pub mod catalog;
pub mod formula;
pub mod payload;
pub mod range;
pub mod session;
pub mod submit;

// 重新导出主要类型
pub use catalog::{TestCatalog, TestCategory, TestDefinition};
pub use formula::{compute_derived, FormulaDetails, FormulaKind, ValueSnapshot};
pub use payload::{missing_required, SubmissionPayload, SubmittedTest, NOT_EVALUATED};
pub use range::{classify, RangeDescriptor, StatusColor, TestStatus};
pub use session::{PropagationConfig, ResultKey, TestEntrySession, TestResult};
pub use submit::{JsonFileSink, ResultSink, RetryPolicy, SubmissionReceipt, Submitter};
