//! 通用工具函数

use regex::Regex;
use std::sync::OnceLock;

/// 解析录入的检验数值
///
/// 只接受完整的有限数字（允许首尾空白），空字符串或夹杂文字的输入返回 `None`。
pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 数字的正则片段：可选符号、整数或小数、可选指数
pub const NUMBER_PATTERN: &str = r"[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?";

fn leading_number_regex() -> &'static Regex {
    static LEADING_NUMBER: OnceLock<Regex> = OnceLock::new();
    LEADING_NUMBER.get_or_init(|| {
        Regex::new(&format!(r"^\s*({})", NUMBER_PATTERN)).expect("number pattern is valid")
    })
}

/// 读取字符串开头的数字前缀
///
/// 用于参考范围边界，例如 `" 5.7 %"` 读作 5.7。没有数字前缀时返回 `None`。
pub fn parse_leading_f64(raw: &str) -> Option<f64> {
    let captures = leading_number_regex().captures(raw)?;
    captures.get(1)?.as_str().parse::<f64>().ok()
}

/// 按固定小数位格式化派生值
pub fn format_fixed(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}
