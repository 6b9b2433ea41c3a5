//! 检验项目目录
//!
//! 按分类组织的静态检验项目定义，构造后不再修改，通过 `Arc` 注入录入会话。

use crate::formula::{
    dependencies_satisfied, FormulaDetails, FormulaKind, ValueSnapshot, DEMOGRAPHIC_TOKENS,
};
use crate::range::RangeDescriptor;
use scanalyze_core::{PatientContext, Result, ScanalyzeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../data/test_catalog.json");

/// 单个检验项目定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    /// 项目名称，分类内唯一
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub normal_range: RangeDescriptor,
    /// 公式描述文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// 稳定的公式标识，优先于描述文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_id: Option<FormulaKind>,
    /// 依赖的项目名称，可含 `Age` / `Gender`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_details: Option<FormulaDetails>,
    /// 提交前必须录入
    #[serde(default)]
    pub required: bool,
}

impl TestDefinition {
    /// 具备公式（描述文本或公式标识）与依赖列表的项目参与级联计算
    pub fn is_derived(&self) -> bool {
        (self.formula.is_some() || self.formula_id.is_some()) && self.depends_on.is_some()
    }

    pub fn dependencies(&self) -> &[String] {
        self.depends_on.as_deref().unwrap_or(&[])
    }

    /// 解析公式种类
    pub fn formula_kind(&self) -> Option<FormulaKind> {
        self.formula_id
            .or_else(|| self.formula.as_deref().and_then(FormulaKind::from_formula_text))
    }

    /// 解析公式种类，无法识别时不记录日志
    fn resolve_formula_kind(&self) -> Option<FormulaKind> {
        self.formula_id
            .or_else(|| self.formula.as_deref().and_then(FormulaKind::match_formula_text))
    }

    /// 依赖列表是否包含任一触发项
    pub fn depends_on_any(&self, triggers: &HashSet<String>) -> bool {
        self.dependencies().iter().any(|dep| triggers.contains(dep))
    }

    /// 计算派生值
    pub fn compute(&self, values: &ValueSnapshot, patient: &PatientContext) -> Option<f64> {
        if !self.is_derived() || !dependencies_satisfied(self.dependencies(), values) {
            return None;
        }

        self.formula_kind()?
            .evaluate(values, patient, self.formula_details.as_ref())
    }
}

/// 检验分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCategory {
    pub name: String,
    pub tests: Vec<TestDefinition>,
}

impl TestCategory {
    pub fn test(&self, name: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|test| test.name == name)
    }
}

/// 检验项目目录
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestCatalog {
    pub categories: Vec<TestCategory>,
}

impl TestCatalog {
    /// 从 JSON 文本加载并校验
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: TestCatalog = serde_json::from_str(json)
            .map_err(|e| ScanalyzeError::Catalog(format!("invalid catalog JSON: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// 从文件加载
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::info!("Loading test catalog from {}", path.display());
        Self::from_json_str(&json)
    }

    /// 内置目录
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn category(&self, name: &str) -> Option<&TestCategory> {
        self.categories.iter().find(|category| category.name == name)
    }

    pub fn test(&self, category: &str, name: &str) -> Option<&TestDefinition> {
        self.category(category)?.test(name)
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// 所有派生项目
    pub fn derived_tests(&self) -> impl Iterator<Item = (&TestCategory, &TestDefinition)> {
        self.categories
            .iter()
            .flat_map(|category| category.tests.iter().map(move |test| (category, test)))
            .filter(|(_, test)| test.is_derived())
    }

    /// 校验目录
    ///
    /// 分类名或分类内项目名重复时报错；依赖未知项目、公式无法识别、派生项目依赖其他派生项目时仅记录警告。
    pub fn validate(&self) -> Result<()> {
        let mut category_names = HashSet::new();
        let mut all_tests = HashSet::new();

        for category in &self.categories {
            if !category_names.insert(category.name.as_str()) {
                return Err(ScanalyzeError::Catalog(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }

            let mut names = HashSet::new();
            for test in &category.tests {
                if !names.insert(test.name.as_str()) {
                    return Err(ScanalyzeError::Catalog(format!(
                        "duplicate test '{}' in category '{}'",
                        test.name, category.name
                    )));
                }
                all_tests.insert(test.name.as_str());
            }
        }

        let derived_names: HashSet<&str> = self
            .derived_tests()
            .map(|(_, test)| test.name.as_str())
            .collect();

        for (category, test) in self.derived_tests() {
            if test.resolve_formula_kind().is_none() {
                tracing::warn!(
                    "Derived test {}:{} has no recognizable formula",
                    category.name,
                    test.name
                );
            }

            for dep in test.dependencies() {
                if DEMOGRAPHIC_TOKENS.contains(&dep.as_str()) {
                    continue;
                }
                if !all_tests.contains(dep.as_str()) {
                    tracing::warn!(
                        "Derived test {}:{} depends on unknown test '{}'",
                        category.name,
                        test.name,
                        dep
                    );
                } else if derived_names.contains(dep.as_str()) {
                    tracing::warn!(
                        "Derived test {}:{} depends on derived test '{}'; single-pass propagation will lag",
                        category.name,
                        test.name,
                        dep
                    );
                }
            }
        }

        Ok(())
    }
}
