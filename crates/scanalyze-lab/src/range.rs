//! 参考范围判定
//!
//! 根据检验项目的参考范围描述判断数值所属的临床分类及其严重程度颜色。

use regex::Regex;
use scanalyze_core::utils::{parse_leading_f64, NUMBER_PATTERN};
use scanalyze_core::Gender;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// 严重程度颜色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Amber,
    Red,
    Gray,
}

/// 判定结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestStatus {
    pub status: String,
    pub color: StatusColor,
}

impl TestStatus {
    pub fn new(status: impl Into<String>, color: StatusColor) -> Self {
        Self {
            status: status.into(),
            color,
        }
    }

    pub fn normal() -> Self {
        Self::new("Normal", StatusColor::Green)
    }

    pub fn abnormal() -> Self {
        Self::new("Abnormal", StatusColor::Red)
    }

    pub fn unknown() -> Self {
        Self::new("Unknown", StatusColor::Gray)
    }
}

/// 命名分类及其范围
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRange {
    pub condition: String,
    pub range: String,
}

/// 参考范围描述
///
/// 对应目录中 `normalRange` 的三种形态：单个范围字符串、按分类（或按性别
/// `"Normal Male"`/`"Normal Female"`）映射的对象，以及其他无法识别的形态。
/// 对象形态保留声明顺序，判定时先匹配者优先。
#[derive(Debug, Clone, PartialEq)]
pub enum RangeDescriptor {
    Single(String),
    Keyed(Vec<ConditionRange>),
    Unsupported(Value),
}

impl RangeDescriptor {
    /// 从 JSON 值构造
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(range) => RangeDescriptor::Single(range),
            Value::Object(map) => RangeDescriptor::Keyed(
                map.into_iter()
                    .map(|(condition, range)| ConditionRange {
                        condition,
                        range: match range {
                            Value::String(s) => s,
                            other => other.to_string(),
                        },
                    })
                    .collect(),
            ),
            other => RangeDescriptor::Unsupported(other),
        }
    }

    /// 转换回 JSON 值
    pub fn to_value(&self) -> Value {
        match self {
            RangeDescriptor::Single(range) => Value::String(range.clone()),
            RangeDescriptor::Keyed(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    map.insert(entry.condition.clone(), Value::String(entry.range.clone()));
                }
                Value::Object(map)
            }
            RangeDescriptor::Unsupported(value) => value.clone(),
        }
    }

    /// 按患者性别取对应的范围条目
    fn gender_entry(&self, gender: Option<Gender>) -> Option<&ConditionRange> {
        let gender = gender?;
        match self {
            RangeDescriptor::Keyed(entries) => entries
                .iter()
                .find(|entry| entry.condition == gender.range_key()),
            _ => None,
        }
    }

    /// 提交报告中展示的范围文本
    pub fn display_for(&self, gender: Option<Gender>) -> String {
        if let Some(entry) = self.gender_entry(gender) {
            return entry.range.clone();
        }

        match self {
            RangeDescriptor::Single(range) => range.clone(),
            RangeDescriptor::Keyed(entries) => entries
                .iter()
                .map(|entry| format!("{}: {}", entry.condition, entry.range))
                .collect::<Vec<_>>()
                .join("; "),
            RangeDescriptor::Unsupported(Value::Null) => String::new(),
            RangeDescriptor::Unsupported(value) => value.to_string(),
        }
    }
}

impl Default for RangeDescriptor {
    fn default() -> Self {
        RangeDescriptor::Unsupported(Value::Null)
    }
}

impl Serialize for RangeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RangeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(RangeDescriptor::from_value)
    }
}

/// 范围字符串：可选比较符、数字、可选的 `-` 上限
fn range_regex() -> &'static Regex {
    static RANGE: OnceLock<Regex> = OnceLock::new();
    RANGE.get_or_init(|| {
        Regex::new(&format!(
            r"^\s*(<|>|≥)?\s*({num})(?:\s*-\s*({num}))?",
            num = NUMBER_PATTERN
        ))
        .expect("range pattern is valid")
    })
}

/// 单个范围字符串解析后的区间
///
/// `>X` 与 `≥X` 一律按 `value >= X` 处理。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interval {
    /// `<X`，严格小于
    Below(f64),
    /// `>X` 或 `≥X`，大于等于
    AtLeast(f64),
    /// `min-max`，两端闭区间
    Between(f64, f64),
    /// 无法解析，不包含任何值
    Unparsed,
}

impl Interval {
    pub fn parse(range: &str) -> Self {
        let Some(captures) = range_regex().captures(range) else {
            return Interval::Unparsed;
        };

        let number = |idx: usize| captures.get(idx).and_then(|m| parse_leading_f64(m.as_str()));
        let Some(first) = number(2) else {
            return Interval::Unparsed;
        };

        match (captures.get(1).map(|m| m.as_str()), number(3)) {
            (Some("<"), _) => Interval::Below(first),
            (Some(_), _) => Interval::AtLeast(first),
            (None, Some(max)) => Interval::Between(first, max),
            (None, None) => Interval::Unparsed,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        match *self {
            Interval::Below(limit) => value < limit,
            Interval::AtLeast(limit) => value >= limit,
            Interval::Between(min, max) => value >= min && value <= max,
            Interval::Unparsed => false,
        }
    }
}

/// 判断数值是否落在范围字符串内
pub fn in_range(value: f64, range: &str) -> bool {
    Interval::parse(range).contains(value)
}

/// 分类名称对应的颜色
fn condition_color(condition: &str) -> StatusColor {
    if condition.contains("Normal") {
        StatusColor::Green
    } else if condition == "Pre-diabetic" {
        StatusColor::Amber
    } else {
        StatusColor::Red
    }
}

/// 判定检验数值
///
/// 调用方负责过滤非数字输入，`value` 应为有限数。
pub fn classify(value: f64, range: &RangeDescriptor, gender: Option<Gender>) -> TestStatus {
    if let Some(entry) = range.gender_entry(gender) {
        return if in_range(value, &entry.range) {
            TestStatus::normal()
        } else {
            TestStatus::abnormal()
        };
    }

    match range {
        RangeDescriptor::Single(range) => {
            if in_range(value, range) {
                TestStatus::normal()
            } else {
                TestStatus::abnormal()
            }
        }
        RangeDescriptor::Keyed(entries) => entries
            .iter()
            .find(|entry| in_range(value, &entry.range))
            .map(|entry| TestStatus::new(entry.condition.clone(), condition_color(&entry.condition)))
            .unwrap_or_else(TestStatus::abnormal),
        RangeDescriptor::Unsupported(_) => TestStatus::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn keyed(value: Value) -> RangeDescriptor {
        RangeDescriptor::from_value(value)
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!(Interval::parse("<5.7"), Interval::Below(5.7));
        assert_eq!(Interval::parse(">60"), Interval::AtLeast(60.0));
        assert_eq!(Interval::parse("≥126"), Interval::AtLeast(126.0));
        assert_eq!(Interval::parse("0.7-1.3"), Interval::Between(0.7, 1.3));
        assert_eq!(Interval::parse(" 70 - 99 mg/dL"), Interval::Between(70.0, 99.0));
        assert_eq!(Interval::parse("-2-2"), Interval::Between(-2.0, 2.0));
        assert_eq!(Interval::parse("negative"), Interval::Unparsed);
        assert_eq!(Interval::parse("<"), Interval::Unparsed);
        assert_eq!(Interval::parse("<5.7 %"), Interval::Below(5.7));
        assert_eq!(Interval::parse("≥ -1.5"), Interval::AtLeast(-1.5));
        assert_eq!(Interval::parse("-5--2"), Interval::Between(-5.0, -2.0));
        assert_eq!(Interval::parse("70"), Interval::Unparsed);
        assert_eq!(Interval::parse("70-abc"), Interval::Unparsed);
    }

    #[test]
    fn test_greater_than_is_inclusive() {
        assert!(in_range(60.0, ">60"));
        assert!(in_range(60.0, "≥60"));
        assert!(!in_range(59.99, ">60"));
        assert!(!in_range(5.7, "<5.7"));
    }

    #[test]
    fn test_single_range_classification() {
        let range = RangeDescriptor::Single("0.7-1.3".to_string());
        assert_eq!(classify(1.0, &range, None), TestStatus::normal());
        assert_eq!(classify(1.3, &range, None), TestStatus::normal());
        assert_eq!(classify(1.4, &range, None), TestStatus::abnormal());
    }

    #[test]
    fn test_gender_specific_range() {
        let range = keyed(json!({
            "Normal Male": "13.5-17.5",
            "Normal Female": "12.0-15.5"
        }));

        assert_eq!(classify(13.0, &range, Some(Gender::Female)), TestStatus::normal());
        assert_eq!(classify(13.0, &range, Some(Gender::Male)), TestStatus::abnormal());
        assert_eq!(range.display_for(Some(Gender::Male)), "13.5-17.5");
    }

    #[test]
    fn test_gender_range_without_gender_falls_back_to_conditions() {
        let range = keyed(json!({
            "Normal Male": "13.5-17.5",
            "Normal Female": "12.0-15.5"
        }));

        let status = classify(16.0, &range, None);
        assert_eq!(status.status, "Normal Male");
        assert_eq!(status.color, StatusColor::Green);
        assert_eq!(classify(20.0, &range, None), TestStatus::abnormal());
    }

    #[test]
    fn test_condition_map_first_match_wins() {
        let range = keyed(json!({
            "Normal": "<5.7",
            "Pre-diabetic": "5.7-6.4",
            "Diabetic": "≥6.4"
        }));

        let status = classify(6.4, &range, Some(Gender::Male));
        assert_eq!(status, TestStatus::new("Pre-diabetic", StatusColor::Amber));

        let status = classify(7.0, &range, None);
        assert_eq!(status, TestStatus::new("Diabetic", StatusColor::Red));

        let status = classify(5.0, &range, None);
        assert_eq!(status, TestStatus::normal());
    }

    #[test]
    fn test_condition_map_no_match() {
        let range = keyed(json!({ "Optimal": "<100", "High": "160-189" }));
        assert_eq!(classify(130.0, &range, None), TestStatus::abnormal());
        assert_eq!(classify(10.0, &keyed(json!({})), None), TestStatus::abnormal());
    }

    #[test]
    fn test_condition_names_containing_normal_are_green() {
        let range = keyed(json!({ "High Normal": "130-139", "Hypertension": "≥140" }));
        assert_eq!(classify(135.0, &range, None).color, StatusColor::Green);
        assert_eq!(classify(150.0, &range, None).color, StatusColor::Red);
    }

    #[test]
    fn test_unsupported_shape() {
        let range = RangeDescriptor::from_value(json!(42));
        assert_eq!(classify(42.0, &range, None), TestStatus::unknown());
        assert_eq!(RangeDescriptor::from_value(Value::Null).display_for(None), "");
    }

    #[test]
    fn test_condition_display_keeps_declared_order() {
        let range: RangeDescriptor =
            serde_json::from_str(r#"{"Normal": "<100", "Pre-diabetic": "100-125", "Diabetic": "≥126"}"#)
                .unwrap();
        assert_eq!(
            range.display_for(Some(Gender::Female)),
            "Normal: <100; Pre-diabetic: 100-125; Diabetic: ≥126"
        );
        assert_eq!(
            serde_json::to_string(&range).unwrap(),
            r#"{"Normal":"<100","Pre-diabetic":"100-125","Diabetic":"≥126"}"#
        );
    }

    proptest! {
        #[test]
        fn prop_between_is_inclusive(v in -1000.0f64..1000.0, a in -500.0f64..500.0, w in 0.0f64..500.0) {
            let b = a + w;
            let range = RangeDescriptor::Single(format!("{}-{}", a, b));
            let normal = classify(v, &range, None).status == "Normal";
            prop_assert_eq!(normal, a <= v && v <= b);
        }

        #[test]
        fn prop_below_is_strict(v in -1000.0f64..1000.0, x in -1000.0f64..1000.0) {
            let range = RangeDescriptor::Single(format!("<{}", x));
            prop_assert_eq!(classify(v, &range, None).status == "Normal", v < x);
        }

        #[test]
        fn prop_above_is_inclusive(v in -1000.0f64..1000.0, x in -1000.0f64..1000.0) {
            for prefix in [">", "≥"] {
                let range = RangeDescriptor::Single(format!("{}{}", prefix, x));
                prop_assert_eq!(classify(v, &range, None).status == "Normal", v >= x);
            }
        }
    }
}
