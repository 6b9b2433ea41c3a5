//! 派生指标计算
//!
//! 由已录入的检验数值和患者人口学信息计算 eGFR、MCV、FIB-4 等派生指标。

use scanalyze_core::utils::parse_numeric;
use scanalyze_core::{Gender, PatientContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// 依赖列表中由患者信息提供的项目
pub const DEMOGRAPHIC_TOKENS: [&str; 3] = ["Age", "Gender", "Race"];

/// 派生公式种类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FormulaKind {
    /// CKD-EPI 估算肾小球滤过率
    CkdEpiEgfr,
    /// 平均红细胞体积
    Mcv,
    /// 平均红细胞血红蛋白量
    Mch,
    /// 平均红细胞血红蛋白浓度
    Mchc,
    /// 红细胞计数估算
    RbcEstimate,
    /// 血小板压积 (MPV × PLT)
    Plateletcrit,
    /// 估算平均血糖
    Eag,
    /// 胰岛素抵抗指数
    HomaIr,
    /// 间接胆红素
    IndirectBilirubin,
    /// 白球比
    AgRatio,
    /// AST/ALT 比值
    AstAltRatio,
    /// 肝纤维化指数
    Fib4,
    /// 一秒率
    Fev1FvcPercent,
}

/// 旧版目录的公式描述文本片段，按顺序匹配
const FORMULA_FRAGMENTS: &[(&str, FormulaKind)] = &[
    ("CKD-EPI", FormulaKind::CkdEpiEgfr),
    ("FIB-4", FormulaKind::Fib4),
    ("(Hematocrit / RBC)", FormulaKind::Mcv),
    ("(Hemoglobin / RBC)", FormulaKind::Mch),
    ("(Hemoglobin / Hematocrit)", FormulaKind::Mchc),
    ("(Hematocrit × 10) / MCV", FormulaKind::RbcEstimate),
    ("MPV × PLT", FormulaKind::Plateletcrit),
    ("28.7 × HbA1c", FormulaKind::Eag),
    ("/ 405", FormulaKind::HomaIr),
    ("Total Bilirubin - Direct Bilirubin", FormulaKind::IndirectBilirubin),
    ("Albumin / (Total Protein - Albumin)", FormulaKind::AgRatio),
    ("AST / ALT", FormulaKind::AstAltRatio),
    ("(FEV1 / FVC)", FormulaKind::Fev1FvcPercent),
];

impl FormulaKind {
    /// 根据公式描述文本识别公式
    ///
    /// 无法识别时记录警告并返回 `None`。
    pub fn from_formula_text(formula: &str) -> Option<Self> {
        let kind = Self::match_formula_text(formula);

        if kind.is_none() {
            tracing::warn!("Unrecognized formula: {}", formula);
        }

        kind
    }

    /// 按文本片段识别公式，不记录日志
    pub fn match_formula_text(formula: &str) -> Option<Self> {
        FORMULA_FRAGMENTS
            .iter()
            .find(|(fragment, _)| formula.contains(fragment))
            .map(|(_, kind)| *kind)
    }

    /// 公式读取的检验项目名称
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            FormulaKind::CkdEpiEgfr => &["Creatinine"],
            FormulaKind::Mcv => &["Hematocrit", "RBC"],
            FormulaKind::Mch => &["Hemoglobin", "RBC"],
            FormulaKind::Mchc => &["Hemoglobin", "Hematocrit"],
            FormulaKind::RbcEstimate => &["Hematocrit", "MCV"],
            FormulaKind::Plateletcrit => &["MPV", "Platelet"],
            FormulaKind::Eag => &["HbA1c"],
            FormulaKind::HomaIr => &["Fasting Glucose", "Fasting Insulin"],
            FormulaKind::IndirectBilirubin => &["Total Bilirubin", "Direct Bilirubin"],
            FormulaKind::AgRatio => &["Albumin", "Total Protein"],
            FormulaKind::AstAltRatio => &["AST", "ALT"],
            FormulaKind::Fib4 => &["AST", "ALT", "Platelet"],
            FormulaKind::Fev1FvcPercent => &["FEV1", "FVC"],
        }
    }

    /// 计算公式结果
    ///
    /// 缺少输入或结果不是有限数时返回 `None`。
    pub fn evaluate(
        &self,
        values: &ValueSnapshot,
        patient: &PatientContext,
        details: Option<&FormulaDetails>,
    ) -> Option<f64> {
        let v = |name: &str| values.get(name);

        let result = match self {
            FormulaKind::CkdEpiEgfr => ckd_epi(v("Creatinine")?, patient, details)?,
            FormulaKind::Mcv => (v("Hematocrit")? / v("RBC")?) * 10.0,
            FormulaKind::Mch => (v("Hemoglobin")? / v("RBC")?) * 10.0,
            FormulaKind::Mchc => (v("Hemoglobin")? / v("Hematocrit")?) * 100.0,
            FormulaKind::RbcEstimate => (v("Hematocrit")? * 10.0) / v("MCV")?,
            FormulaKind::Plateletcrit => (v("MPV")? * v("Platelet")?) / 10_000.0,
            FormulaKind::Eag => 28.7 * v("HbA1c")? - 46.7,
            FormulaKind::HomaIr => (v("Fasting Glucose")? * v("Fasting Insulin")?) / 405.0,
            FormulaKind::IndirectBilirubin => v("Total Bilirubin")? - v("Direct Bilirubin")?,
            FormulaKind::AgRatio => {
                let albumin = v("Albumin")?;
                albumin / (v("Total Protein")? - albumin)
            }
            FormulaKind::AstAltRatio => v("AST")? / v("ALT")?,
            FormulaKind::Fib4 => {
                let age = f64::from(patient.age?);
                (age * v("AST")?) / (v("Platelet")? * v("ALT")?.sqrt())
            }
            FormulaKind::Fev1FvcPercent => (v("FEV1")? / v("FVC")?) * 100.0,
        };

        if result.is_finite() {
            Some(result)
        } else {
            tracing::debug!("Formula {:?} produced non-finite result {}", self, result);
            None
        }
    }
}

/// CKD-EPI 默认系数 (κ, α)
fn default_ckd_epi_coefficients(gender: Gender) -> (f64, f64) {
    match gender {
        Gender::Male => (0.9, -0.302),
        Gender::Female => (0.7, -0.241),
    }
}

fn ckd_epi(
    creatinine: f64,
    patient: &PatientContext,
    details: Option<&FormulaDetails>,
) -> Option<f64> {
    let age = f64::from(patient.age?);
    let gender = patient.gender?;
    let (default_kappa, default_alpha) = default_ckd_epi_coefficients(gender);

    let kappa = details
        .and_then(|d| d.coefficient(&["κ", "kappa"], gender))
        .unwrap_or(default_kappa);
    let alpha = details
        .and_then(|d| d.coefficient(&["α", "alpha"], gender))
        .unwrap_or(default_alpha);

    let ratio = creatinine / kappa;
    let sex_factor = if gender == Gender::Female { 1.012 } else { 1.0 };

    Some(
        142.0
            * ratio.min(1.0).powf(alpha)
            * ratio.max(1.0).powf(-1.2)
            * 0.9938f64.powf(age)
            * sex_factor,
    )
}

/// 公式附加参数
///
/// `variables` 中的系数可以是数字、数字字符串，或按性别区分的对象
/// (`{"male": 0.9, "female": 0.7}`)。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormulaDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl FormulaDetails {
    /// 读取系数，依次尝试给定的变量名；格式不正确时返回 `None`
    pub fn coefficient(&self, names: &[&str], gender: Gender) -> Option<f64> {
        names
            .iter()
            .filter_map(|name| self.variables.get(*name))
            .find_map(|value| coefficient_value(value, gender))
    }
}

fn coefficient_value(value: &Value, gender: Gender) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        Value::Object(map) => {
            let key = gender.to_string();
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                .and_then(|(_, v)| coefficient_value(v, gender))
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// 公式计算用的数值快照
///
/// 以不带分类前缀的项目名为键，另含 `Age` 与 `Gender`（男=1，女=0）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSnapshot {
    values: HashMap<String, f64>,
}

impl ValueSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ValueSnapshot {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// 检查依赖项是否都已有数值；人口学项目视为始终可用
pub fn dependencies_satisfied(dependencies: &[String], values: &ValueSnapshot) -> bool {
    dependencies
        .iter()
        .filter(|dep| !DEMOGRAPHIC_TOKENS.contains(&dep.as_str()))
        .all(|dep| values.contains(dep))
}

/// 按公式描述文本计算派生值
///
/// 任一依赖缺失时直接返回 `None`，不做部分计算。
pub fn compute_derived(
    formula: &str,
    dependencies: &[String],
    values: &ValueSnapshot,
    patient: &PatientContext,
    details: Option<&FormulaDetails>,
) -> Option<f64> {
    if !dependencies_satisfied(dependencies, values) {
        return None;
    }

    FormulaKind::from_formula_text(formula)?.evaluate(values, patient, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ckd_epi_male_fallback_constants() {
        let values: ValueSnapshot = [("Creatinine", 1.0)].into_iter().collect();
        let patient = PatientContext::new(Some(40), Some(Gender::Male));

        let egfr = compute_derived(
            "eGFR (CKD-EPI 2021) = 142 × min(Scr/κ, 1)^α × max(Scr/κ, 1)^-1.200 × 0.9938^Age",
            &deps(&["Creatinine", "Age", "Gender"]),
            &values,
            &patient,
            None,
        )
        .unwrap();

        let r: f64 = 1.0 / 0.9;
        let expected = 142.0 * r.min(1.0).powf(-0.302) * r.max(1.0).powf(-1.2) * 0.9938f64.powf(40.0);
        assert!(approx(egfr, expected));
        assert!((egfr - 97.575).abs() < 0.01);
    }

    #[test]
    fn test_ckd_epi_female() {
        let values: ValueSnapshot = [("Creatinine", 0.8)].into_iter().collect();
        let patient = PatientContext::new(Some(50), Some(Gender::Female));

        let egfr = FormulaKind::CkdEpiEgfr.evaluate(&values, &patient, None).unwrap();
        assert!((egfr - 89.707).abs() < 0.01);
    }

    #[test]
    fn test_ckd_epi_variables_override_constants() {
        let values: ValueSnapshot = [("Creatinine", 1.0)].into_iter().collect();
        let patient = PatientContext::new(Some(40), Some(Gender::Male));

        let details: FormulaDetails = serde_json::from_value(json!({
            "variables": {
                "κ": { "male": "0.9", "female": "0.7" },
                "α": { "male": -0.302, "female": -0.241 }
            }
        }))
        .unwrap();
        let with_details = FormulaKind::CkdEpiEgfr
            .evaluate(&values, &patient, Some(&details))
            .unwrap();
        let fallback = FormulaKind::CkdEpiEgfr.evaluate(&values, &patient, None).unwrap();
        assert!(approx(with_details, fallback));

        let custom: FormulaDetails =
            serde_json::from_value(json!({ "variables": { "κ": 1.0 } })).unwrap();
        let custom_egfr = FormulaKind::CkdEpiEgfr
            .evaluate(&values, &patient, Some(&custom))
            .unwrap();
        assert!(approx(custom_egfr, 142.0 * 0.9938f64.powf(40.0)));
    }

    #[test]
    fn test_ckd_epi_malformed_variables_fall_back() {
        let values: ValueSnapshot = [("Creatinine", 1.0)].into_iter().collect();
        let patient = PatientContext::new(Some(40), Some(Gender::Male));
        let details: FormulaDetails = serde_json::from_value(json!({
            "variables": { "κ": "0.7 for women, 0.9 for men", "α": [1, 2] }
        }))
        .unwrap();

        let egfr = FormulaKind::CkdEpiEgfr
            .evaluate(&values, &patient, Some(&details))
            .unwrap();
        let fallback = FormulaKind::CkdEpiEgfr.evaluate(&values, &patient, None).unwrap();
        assert!(approx(egfr, fallback));
    }

    #[test]
    fn test_ckd_epi_requires_demographics() {
        let values: ValueSnapshot = [("Creatinine", 1.0)].into_iter().collect();
        assert!(FormulaKind::CkdEpiEgfr
            .evaluate(&values, &PatientContext::new(None, Some(Gender::Male)), None)
            .is_none());
        assert!(FormulaKind::CkdEpiEgfr
            .evaluate(&values, &PatientContext::new(Some(40), None), None)
            .is_none());
    }

    #[test]
    fn test_missing_dependency_returns_none() {
        let values: ValueSnapshot = [("Hematocrit", 42.0)].into_iter().collect();
        let patient = PatientContext::default();

        assert!(compute_derived(
            "MCV = (Hematocrit / RBC) × 10",
            &deps(&["Hematocrit", "RBC"]),
            &values,
            &patient,
            None
        )
        .is_none());

        // 未知公式在依赖缺失时同样直接返回
        assert!(compute_derived("mystery", &deps(&["Missing"]), &values, &patient, None).is_none());
    }

    #[test]
    fn test_unrecognized_formula() {
        let values = ValueSnapshot::new();
        assert!(compute_derived("x + y", &[], &values, &PatientContext::default(), None).is_none());
        assert_eq!(FormulaKind::from_formula_text("x + y"), None);
        assert_eq!(FormulaKind::match_formula_text("x + y"), None);
        assert_eq!(
            FormulaKind::match_formula_text("AST/ALT Ratio = AST / ALT"),
            Some(FormulaKind::AstAltRatio)
        );
    }

    #[test]
    fn test_simple_formulas() {
        let values: ValueSnapshot = [
            ("Hematocrit", 45.0),
            ("RBC", 5.0),
            ("Hemoglobin", 15.0),
            ("MCV", 90.0),
            ("MPV", 10.0),
            ("Platelet", 250.0),
            ("HbA1c", 6.0),
            ("Fasting Glucose", 90.0),
            ("Fasting Insulin", 9.0),
            ("Total Bilirubin", 1.0),
            ("Direct Bilirubin", 0.3),
            ("Albumin", 4.0),
            ("Total Protein", 7.0),
            ("AST", 30.0),
            ("ALT", 25.0),
            ("FEV1", 3.0),
            ("FVC", 4.0),
        ]
        .into_iter()
        .collect();
        let patient = PatientContext::new(Some(45), Some(Gender::Male));
        let eval = |kind: FormulaKind| kind.evaluate(&values, &patient, None).unwrap();

        assert!(approx(eval(FormulaKind::Mcv), 90.0));
        assert!(approx(eval(FormulaKind::Mch), 30.0));
        assert!(approx(eval(FormulaKind::Mchc), 15.0 / 45.0 * 100.0));
        assert!(approx(eval(FormulaKind::RbcEstimate), 5.0));
        assert!(approx(eval(FormulaKind::Plateletcrit), 0.25));
        assert!(approx(eval(FormulaKind::Eag), 28.7 * 6.0 - 46.7));
        assert!(approx(eval(FormulaKind::HomaIr), 2.0));
        assert!(approx(eval(FormulaKind::IndirectBilirubin), 0.7));
        assert!(approx(eval(FormulaKind::AgRatio), 4.0 / 3.0));
        assert!(approx(eval(FormulaKind::AstAltRatio), 1.2));
        assert!(approx(eval(FormulaKind::Fib4), 1.08));
        assert!(approx(eval(FormulaKind::Fev1FvcPercent), 75.0));
    }

    #[test]
    fn test_fib4_requires_age() {
        let values: ValueSnapshot = [("AST", 30.0), ("ALT", 25.0), ("Platelet", 250.0)]
            .into_iter()
            .collect();
        assert!(FormulaKind::Fib4
            .evaluate(&values, &PatientContext::default(), None)
            .is_none());
    }

    #[test]
    fn test_division_by_zero_yields_none() {
        let values: ValueSnapshot = [("AST", 30.0), ("ALT", 0.0)].into_iter().collect();
        assert!(FormulaKind::AstAltRatio
            .evaluate(&values, &PatientContext::default(), None)
            .is_none());
    }

    #[test]
    fn test_text_fragment_resolution() {
        let cases = [
            ("FIB-4 = (Age × AST) / (Platelet × √ALT)", FormulaKind::Fib4),
            ("AST/ALT Ratio = AST / ALT", FormulaKind::AstAltRatio),
            ("HOMA-IR = (Fasting Glucose × Fasting Insulin) / 405", FormulaKind::HomaIr),
            ("eAG = 28.7 × HbA1c - 46.7", FormulaKind::Eag),
            ("A/G = Albumin / (Total Protein - Albumin)", FormulaKind::AgRatio),
            ("FEV1/FVC % = (FEV1 / FVC) × 100", FormulaKind::Fev1FvcPercent),
        ];
        for (text, kind) in cases {
            assert_eq!(FormulaKind::from_formula_text(text), Some(kind), "{}", text);
        }
    }

    #[test]
    fn test_formula_kind_serde_names() {
        assert_eq!(serde_json::to_value(FormulaKind::CkdEpiEgfr).unwrap(), "ckd-epi-egfr");
        let kind: FormulaKind = serde_json::from_value(json!("fev1-fvc-percent")).unwrap();
        assert_eq!(kind, FormulaKind::Fev1FvcPercent);
    }
}
