//! 结果提交
//!
//! 将提交报文交给外部接收方，失败时按指数退避重试。

use crate::payload::SubmissionPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanalyze_core::{Result, ScanalyzeError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// 提交回执
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionReceipt {
    pub submission_id: Uuid,
    /// 接收方给出的位置（文件路径、资源地址等）
    pub location: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// 提交接收方接口
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 接收方名称
    fn name(&self) -> &str;

    /// 提交报文
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt>;
}

/// 写入本地目录的 JSON 文件接收方
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

/// 文件名只保留字母数字、`-` 与 `_`
fn sanitize_file_stem(raw: &str) -> String {
    let stem: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "patient".to_string()
    } else {
        stem
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let submission_id = Uuid::new_v4();
        let path = self.dir.join(format!(
            "{}-{}.json",
            sanitize_file_stem(&payload.patient_info.id),
            submission_id.simple()
        ));

        let json = payload.to_json_pretty()?;
        tokio::fs::write(&path, json).await?;

        Ok(SubmissionReceipt {
            submission_id,
            location: Some(path.display().to_string()),
            submitted_at: Utc::now(),
        })
    }
}

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间，`attempt` 从 1 开始
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

/// 带重试的提交器
#[derive(Debug)]
pub struct Submitter<S: ResultSink> {
    sink: S,
    policy: RetryPolicy,
}

impl<S: ResultSink> Submitter<S> {
    pub fn new(sink: S, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 提交报文，失败时按策略重试
    pub async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.sink.submit(payload).await {
                Ok(receipt) => {
                    info!(
                        "Submission {} for patient {} accepted by {} (attempt {})",
                        receipt.submission_id,
                        payload.patient_info.id,
                        self.sink.name(),
                        attempt
                    );
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(
                        "Submission to {} failed (attempt {}/{}): {}",
                        self.sink.name(),
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(ScanalyzeError::Submission(format!(
            "{} gave up after {} attempts: {}",
            self.sink.name(),
            max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
