//! 检验录入会话
//!
//! 保存一次录入过程中的全部结果，在原始值或患者信息变化时级联重算依赖它的派生项目。
//! 会话由当前录入者独占，重置或更换患者时丢弃。

use crate::catalog::{TestCatalog, TestDefinition};
use crate::formula::ValueSnapshot;
use crate::range::{classify, TestStatus};
use scanalyze_core::utils::{format_fixed, parse_numeric};
use scanalyze_core::{PatientContext, Result, ScanalyzeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 结果键，格式为 `category:testName`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub category: String,
    pub test: String,
}

impl ResultKey {
    pub fn new(category: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            test: test.into(),
        }
    }

    /// 解析 `category:testName`，以第一个冒号分隔
    pub fn parse(raw: &str) -> Option<Self> {
        let (category, test) = raw.split_once(':')?;
        if category.is_empty() || test.is_empty() {
            return None;
        }
        Some(Self::new(category, test))
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.test)
    }
}

/// 单项检验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// 录入或计算得到的原始文本
    pub value: String,
    /// 非数字时为 `None`
    pub status: Option<TestStatus>,
}

/// 级联计算配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// 最大传播轮数，1 表示单轮
    pub max_passes: usize,
    /// 派生值保留的小数位
    pub decimals: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_passes: 1,
            decimals: 2,
        }
    }
}

/// 触发重算的输入
#[derive(Debug, Clone)]
enum Trigger {
    Inputs(HashSet<String>),
    All,
}

/// 检验录入会话
#[derive(Debug)]
pub struct TestEntrySession {
    id: Uuid,
    catalog: Arc<TestCatalog>,
    patient: PatientContext,
    config: PropagationConfig,
    selected: Vec<ResultKey>,
    results: BTreeMap<ResultKey, TestResult>,
}

impl TestEntrySession {
    /// 创建新的录入会话
    pub fn new(catalog: Arc<TestCatalog>, patient: PatientContext) -> Self {
        Self::with_config(catalog, patient, PropagationConfig::default())
    }

    pub fn with_config(
        catalog: Arc<TestCatalog>,
        patient: PatientContext,
        config: PropagationConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(
            "Test entry session {} started (age: {:?}, gender: {:?})",
            id,
            patient.age,
            patient.gender
        );

        Self {
            id,
            catalog,
            patient,
            config,
            selected: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn patient(&self) -> &PatientContext {
        &self.patient
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn results(&self) -> &BTreeMap<ResultKey, TestResult> {
        &self.results
    }

    pub fn result(&self, category: &str, test: &str) -> Option<&TestResult> {
        self.results.get(&ResultKey::new(category, test))
    }

    /// 已选择的项目，按选择顺序
    pub fn selected(&self) -> &[ResultKey] {
        &self.selected
    }

    /// 已选择项目及其定义
    pub fn selected_definitions(&self) -> impl Iterator<Item = (&ResultKey, &TestDefinition)> {
        self.selected.iter().filter_map(|key| {
            self.catalog
                .test(&key.category, &key.test)
                .map(|definition| (key, definition))
        })
    }

    /// 选择整个分类
    pub fn select_category(&mut self, category: &str) -> Result<()> {
        let tests: Vec<ResultKey> = self
            .catalog
            .category(category)
            .ok_or_else(|| ScanalyzeError::NotFound(format!("category '{}'", category)))?
            .tests
            .iter()
            .map(|test| ResultKey::new(category, test.name.as_str()))
            .collect();

        for key in tests {
            if !self.selected.contains(&key) {
                self.selected.push(key);
            }
        }

        tracing::debug!("Session {} selected category {}", self.id, category);
        Ok(())
    }

    /// 选择单个项目
    pub fn select_test(&mut self, category: &str, test: &str) -> Result<()> {
        if self.catalog.test(category, test).is_none() {
            return Err(ScanalyzeError::NotFound(format!("test '{}:{}'", category, test)));
        }

        let key = ResultKey::new(category, test);
        if !self.selected.contains(&key) {
            self.selected.push(key);
        }
        Ok(())
    }

    /// 取消选择分类，并丢弃该分类的结果
    pub fn deselect_category(&mut self, category: &str) {
        self.selected.retain(|key| key.category != category);
        self.results.retain(|key, _| key.category != category);
    }

    /// 清空全部结果
    pub fn reset(&mut self) {
        tracing::info!("Test entry session {} reset", self.id);
        self.results.clear();
    }

    /// 录入值变化
    ///
    /// 写入原始值并判定，然后重算依赖该项目的派生项目。返回被覆盖的派生结果键。
    pub fn on_value_changed(&mut self, category: &str, test: &str, value: &str) -> Vec<ResultKey> {
        let key = ResultKey::new(category, test);

        let status = match self.catalog.test(category, test) {
            Some(definition) => self.status_for(definition, value),
            None => {
                tracing::warn!("Value entered for unknown test {}", key);
                None
            }
        };

        self.results.insert(
            key.clone(),
            TestResult {
                value: value.to_string(),
                status,
            },
        );

        let triggers = HashSet::from([test.to_string()]);
        self.propagate(Trigger::Inputs(triggers), Some(&key))
    }

    /// 更新患者信息
    ///
    /// 年龄或性别变化时重算依赖 `Age` / `Gender` 的派生项目；性别变化还会重新判定已有结果。
    pub fn update_patient(&mut self, patient: PatientContext) -> Vec<ResultKey> {
        let mut triggers = HashSet::new();
        if patient.age != self.patient.age {
            triggers.insert("Age".to_string());
        }
        let gender_changed = patient.gender != self.patient.gender;
        if gender_changed {
            triggers.insert("Gender".to_string());
        }

        self.patient = patient;

        if gender_changed {
            self.reclassify_all();
        }

        if triggers.is_empty() {
            return Vec::new();
        }

        tracing::debug!("Session {} patient changed: {:?}", self.id, triggers);
        self.propagate(Trigger::Inputs(triggers), None)
    }

    /// 重算所有已选择的派生项目
    pub fn recompute_all(&mut self) -> Vec<ResultKey> {
        self.propagate(Trigger::All, None)
    }

    /// 当前所有数值结果的快照
    pub fn snapshot(&self) -> ValueSnapshot {
        let mut snapshot = ValueSnapshot::new();

        for (key, result) in &self.results {
            if let Some(value) = parse_numeric(&result.value) {
                snapshot.insert(key.test.clone(), value);
            }
        }

        if let Some(age) = self.patient.age {
            snapshot.insert("Age", f64::from(age));
        }
        if let Some(gender) = self.patient.gender {
            snapshot.insert("Gender", gender.snapshot_value());
        }

        snapshot
    }

    fn status_for(&self, definition: &TestDefinition, value: &str) -> Option<TestStatus> {
        parse_numeric(value)
            .map(|v| classify(v, &definition.normal_range, self.patient.gender))
    }

    fn reclassify_all(&mut self) {
        let catalog = Arc::clone(&self.catalog);
        let gender = self.patient.gender;

        for (key, result) in self.results.iter_mut() {
            if let Some(definition) = catalog.test(&key.category, &key.test) {
                result.status = parse_numeric(&result.value)
                    .map(|v| classify(v, &definition.normal_range, gender));
            }
        }
    }

    /// 级联重算
    ///
    /// 每轮遍历一次已选择项目；`max_passes` 大于 1 时，以上一轮数值发生变化的派生项目作为下一轮的触发项，
    /// 直到没有变化或达到轮数上限。
    fn propagate(&mut self, trigger: Trigger, edited: Option<&ResultKey>) -> Vec<ResultKey> {
        let catalog = Arc::clone(&self.catalog);
        let selected = self.selected.clone();
        let mut trigger = trigger;
        let mut updated: Vec<ResultKey> = Vec::new();

        for pass in 0..self.config.max_passes.max(1) {
            let snapshot = self.snapshot();
            let mut changed = HashSet::new();

            for key in &selected {
                if edited == Some(key) {
                    continue;
                }

                let Some(definition) = catalog.test(&key.category, &key.test) else {
                    continue;
                };
                if !definition.is_derived() {
                    continue;
                }

                let triggered = match &trigger {
                    Trigger::All => true,
                    Trigger::Inputs(inputs) => definition.depends_on_any(inputs),
                };
                if !triggered {
                    continue;
                }

                let Some(value) = definition.compute(&snapshot, &self.patient) else {
                    tracing::debug!("Derived test {} not computable yet", key);
                    continue;
                };

                let formatted = format_fixed(value, self.config.decimals);
                let status = self.status_for(definition, &formatted);
                let previous = self.results.insert(
                    key.clone(),
                    TestResult {
                        value: formatted.clone(),
                        status,
                    },
                );

                if previous.map(|p| p.value) != Some(formatted) {
                    changed.insert(definition.name.clone());
                }
                if !updated.contains(key) {
                    updated.push(key.clone());
                }
            }

            tracing::debug!(
                "Session {} propagation pass {} updated {} derived values",
                self.id,
                pass + 1,
                changed.len()
            );

            if changed.is_empty() {
                break;
            }
            trigger = Trigger::Inputs(changed);
        }

        updated
    }
}
