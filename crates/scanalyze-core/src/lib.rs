//! # Scanalyze Core
//!
//! Scanalyze系统的核心模块，提供患者数据结构、错误定义和数值解析工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{Result, ScanalyzeError};
pub use models::*;
