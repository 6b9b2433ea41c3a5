//! 提交报文
//!
//! 提交时把会话结果按分类整理成后端接收的结构。

use crate::session::{ResultKey, TestEntrySession};
use chrono::{DateTime, Utc};
use scanalyze_core::utils::parse_numeric;
use scanalyze_core::{PatientRecord, Result, ScanalyzeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 未判定结果的状态文本
pub const NOT_EVALUATED: &str = "Not Evaluated";

/// 单项提交结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTest {
    pub test_name: String,
    pub value: String,
    pub normal_range: String,
    pub unit: String,
    pub status: String,
}

/// 提交报文
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub patient_info: PatientRecord,
    pub results: BTreeMap<String, Vec<SubmittedTest>>,
    pub timestamp: DateTime<Utc>,
}

impl SubmissionPayload {
    /// 构造提交报文
    ///
    /// 包含所有已选择项目；未录入的项目值为空字符串。范围按会话中的患者性别解析。
    pub fn build(session: &TestEntrySession, patient: &PatientRecord) -> Self {
        let gender = session.patient().gender;
        let mut results: BTreeMap<String, Vec<SubmittedTest>> = BTreeMap::new();

        for (key, definition) in session.selected_definitions() {
            let result = session.results().get(key);

            let submitted = SubmittedTest {
                test_name: definition.name.clone(),
                value: result.map(|r| r.value.clone()).unwrap_or_default(),
                normal_range: definition.normal_range.display_for(gender),
                unit: definition.unit.clone(),
                status: result
                    .and_then(|r| r.status.as_ref())
                    .map(|s| s.status.clone())
                    .unwrap_or_else(|| NOT_EVALUATED.to_string()),
            };

            results.entry(key.category.clone()).or_default().push(submitted);
        }

        tracing::info!(
            "Built submission payload for patient {} with {} categories",
            patient.id,
            results.len()
        );

        Self {
            patient_info: patient.clone(),
            results,
            timestamp: Utc::now(),
        }
    }

    /// 校验必填项后构造提交报文
    pub fn build_validated(session: &TestEntrySession, patient: &PatientRecord) -> Result<Self> {
        let missing = missing_required(session);
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(ScanalyzeError::Validation(format!(
                "missing required tests: {}",
                names.join(", ")
            )));
        }

        Ok(Self::build(session, patient))
    }

    /// 提交结果总数
    pub fn test_count(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 已选择但尚未录入有效数值的必填原始项目
pub fn missing_required(session: &TestEntrySession) -> Vec<ResultKey> {
    session
        .selected_definitions()
        .filter(|(_, definition)| definition.required && !definition.is_derived())
        .filter(|(key, _)| {
            session
                .results()
                .get(*key)
                .and_then(|r| parse_numeric(&r.value))
                .is_none()
        })
        .map(|(key, _)| key.clone())
        .collect()
}
