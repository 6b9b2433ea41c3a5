//! 核心数据模型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScanalyzeError;

/// 性别枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// 性别分组参考范围中对应的键
    pub fn range_key(&self) -> &'static str {
        match self {
            Gender::Male => "Normal Male",
            Gender::Female => "Normal Female",
        }
    }

    /// 注入公式快照时的数值编码 (男=1, 女=0)
    pub fn snapshot_value(&self) -> f64 {
        match self {
            Gender::Male => 1.0,
            Gender::Female => 0.0,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

impl FromStr for Gender {
    type Err = ScanalyzeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(ScanalyzeError::Validation(format!(
                "unknown gender '{}', expected male or female",
                other
            ))),
        }
    }
}

/// 检验录入会话所需的患者信息子集
///
/// 修改患者信息时整体替换，参见会话的 `update_patient`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientContext {
    /// 年龄（岁），年龄相关公式必需
    pub age: Option<u32>,
    /// 性别，性别分组范围与公式必需
    pub gender: Option<Gender>,
    /// 种族，暂未参与计算
    #[serde(default = "default_race")]
    pub race: String,
}

fn default_race() -> String {
    "unknown".to_string()
}

impl PatientContext {
    pub fn new(age: Option<u32>, gender: Option<Gender>) -> Self {
        Self {
            age,
            gender,
            race: default_race(),
        }
    }
}

impl Default for PatientContext {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// 提交到后端时附带的患者身份信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    pub name: String,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
    #[serde(rename = "nationalID")]
    pub national_id: Option<String>,
}

impl PatientRecord {
    /// 提取计算所需的患者上下文
    pub fn context(&self) -> PatientContext {
        PatientContext::new(self.age, self.gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parsing() {
        assert_eq!("Male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!(" f ".parse::<Gender>().unwrap(), Gender::Female);
        assert!("other".parse::<Gender>().is_err());
    }

    #[test]
    fn test_patient_record_serialization() {
        let record = PatientRecord {
            id: "p-1".to_string(),
            name: "Test Patient".to_string(),
            gender: Some(Gender::Female),
            age: Some(50),
            national_id: Some("29801011234567".to_string()),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["gender"], "female");
        assert_eq!(value["nationalID"], "29801011234567");
        assert_eq!(record.context().race, "unknown");
    }
}
