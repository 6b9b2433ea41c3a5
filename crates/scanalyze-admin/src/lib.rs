//! # Scanalyze管理模块
//!
//! 提供配置加载、配置校验与日志初始化等运维功能

pub mod config;
pub mod logging;

pub use config::{
    ConfigManager, ConfigValidator, LabConfig, LoggingConfig, ScanalyzeConfig, SubmissionConfig,
};
pub use logging::{init_logging, LogFormat};
