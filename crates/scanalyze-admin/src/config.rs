//! 配置管理
//!
//! 从配置文件与 `SCANALYZE_` 前缀的环境变量加载配置，并在使用前校验。

use crate::logging::LogFormat;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use scanalyze_lab::{PropagationConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "SCANALYZE";

/// 支持的日志格式
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Scanalyze 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanalyzeConfig {
    /// 检验录入配置
    pub lab: LabConfig,
    /// 结果提交配置
    pub submission: SubmissionConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 检验录入配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// 检验目录文件，未设置时使用内置目录
    pub catalog_path: Option<String>,
    /// 级联计算配置
    pub propagation: PropagationConfig,
}

/// 结果提交配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// 提交文件输出目录，未设置时只打印报文
    pub output_dir: Option<String>,
    /// 总尝试次数
    pub max_attempts: u32,
    /// 首次重试等待（毫秒）
    pub initial_backoff_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
}

impl SubmissionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_attempts: 3,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
    /// 日志格式：pretty、compact 或 json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 配置加载器
#[derive(Debug)]
pub struct ConfigManager {
    config: ScanalyzeConfig,
    config_path: Option<PathBuf>,
    validator: ConfigValidator,
}

impl ConfigManager {
    /// 加载并校验配置，`config_path` 为空时只读取环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    fn load_config(config_path: Option<&Path>) -> Result<ScanalyzeConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: ScanalyzeConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn config(&self) -> &ScanalyzeConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 消费加载器并返回配置
    pub fn into_config(self) -> ScanalyzeConfig {
        self.config
    }

    /// 替换配置，新配置需通过校验
    pub fn update_config(&mut self, new_config: ScanalyzeConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        self.config = new_config;
        info!("Configuration updated successfully");
        Ok(())
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    validator: fn(&ScanalyzeConfig) -> Result<()>,
    error_message: &'static str,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "lab.propagation.max_passes",
                validator: |config| {
                    if config.lab.propagation.max_passes == 0 {
                        Err(anyhow::anyhow!("Propagation passes cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid propagation pass count",
            },
            ValidationRule {
                field_path: "submission.max_attempts",
                validator: |config| {
                    if config.submission.max_attempts == 0 {
                        Err(anyhow::anyhow!("Submission attempts cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid submission attempt count",
            },
            ValidationRule {
                field_path: "submission.backoff_multiplier",
                validator: |config| {
                    let multiplier = config.submission.backoff_multiplier;
                    if !multiplier.is_finite() || multiplier < 1.0 {
                        Err(anyhow::anyhow!(
                            "Backoff multiplier must be at least 1.0, got {}",
                            multiplier
                        ))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid backoff multiplier",
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| {
                    config
                        .logging
                        .format
                        .parse::<LogFormat>()
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("{}, expected one of {:?}", e, LOG_FORMATS))
                },
                error_message: "Invalid log format",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ScanalyzeConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
