//! 算法参数模型
//!
//! 参数以字符串为键、动态类型为值的映射交换 (`ParamMap`).
//! 每个参数由 `ParameterSpec` 描述类型、默认值、范围与枚举选项,
//! 写入前统一经过 `sanitize` 转换与钳位.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 动态类型参数值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

pub type ParamMap = BTreeMap<String, ParamValue>;

/// 构造 `ParamMap`
///
/// ```
/// use framepipe_rs::params;
/// let p = params! { "kernelSize" => 5, "invert" => true };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::algorithms::ParamMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::algorithms::ParamMap::new();
        $( map.insert(($key).to_string(), $crate::algorithms::ParamValue::from($value)); )+
        map
    }};
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            ParamValue::Float(_) => None,
            ParamValue::Bool(b) => Some(*b as i64),
            ParamValue::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v).filter(|v| v.is_finite()),
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParamValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Int(v) => Some(*v != 0),
            ParamValue::Float(v) => Some(*v != 0.0),
            ParamValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" | "" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// 解析命令行形式的值: `true` / `12` / `0.5` / 其它按字符串
    pub fn parse_loose(text: &str) -> Self {
        let text = text.trim();
        if let Ok(b) = text.parse::<bool>() {
            ParamValue::Bool(b)
        } else if let Ok(i) = text.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = text.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::String(text.to_string())
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v as f64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Int,
    Float,
    String,
    Bool,
    Enum,
}

/// 参数元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// 必须为奇数 (核大小类参数)
    pub odd: bool,
    pub options: Vec<String>,
}

impl ParameterSpec {
    fn base(name: &str, display_name: &str, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: String::new(),
            kind,
            default,
            min: None,
            max: None,
            odd: false,
            options: Vec::new(),
        }
    }

    pub fn int(name: &str, display_name: &str, default: i64) -> Self {
        Self::base(name, display_name, ParamKind::Int, ParamValue::Int(default))
    }

    pub fn float(name: &str, display_name: &str, default: f64) -> Self {
        Self::base(name, display_name, ParamKind::Float, ParamValue::Float(default))
    }

    pub fn boolean(name: &str, display_name: &str, default: bool) -> Self {
        Self::base(name, display_name, ParamKind::Bool, ParamValue::Bool(default))
    }

    pub fn string(name: &str, display_name: &str, default: &str) -> Self {
        Self::base(name, display_name, ParamKind::String, ParamValue::from(default))
    }

    pub fn enumeration(name: &str, display_name: &str, default: i64, options: &[&str]) -> Self {
        let mut spec = Self::base(name, display_name, ParamKind::Enum, ParamValue::Int(default));
        spec.options = options.iter().map(|s| s.to_string()).collect();
        spec
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn odd(mut self) -> Self {
        self.odd = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// 转换为本参数的类型并钳位到 `[min, max]`; 无法转换时返回 None
    pub fn sanitize(&self, value: &ParamValue) -> Option<ParamValue> {
        match self.kind {
            ParamKind::Int => {
                let mut v = value.as_i64()?;
                if let Some(min) = self.min {
                    v = v.max(min.ceil() as i64);
                }
                if let Some(max) = self.max {
                    v = v.min(max.floor() as i64);
                }
                if self.odd && v % 2 == 0 {
                    // 向上取最近奇数, 超出上限时向下
                    let up_fits = self.max.map_or(true, |max| (v + 1) as f64 <= max);
                    v = if up_fits { v + 1 } else { v - 1 };
                }
                Some(ParamValue::Int(v))
            }
            ParamKind::Float => {
                let mut v = value.as_f64()?;
                if let Some(min) = self.min {
                    v = v.max(min);
                }
                if let Some(max) = self.max {
                    v = v.min(max);
                }
                Some(ParamValue::Float(v))
            }
            ParamKind::Bool => value.as_bool().map(ParamValue::Bool),
            ParamKind::String => Some(ParamValue::String(value.to_string())),
            ParamKind::Enum => {
                let last = self.options.len().saturating_sub(1) as i64;
                let index = match value {
                    ParamValue::String(s) => match self.options.iter().position(|o| o == s) {
                        Some(i) => i as i64,
                        None => value.as_i64()?,
                    },
                    _ => value.as_i64()?,
                };
                Some(ParamValue::Int(index.clamp(0, last)))
            }
        }
    }
}

/// 遍历参数元数据, 对调用方提供的每个键做转换钳位后交给 `apply`
///
/// 未知键与无法转换的值被忽略.
pub fn apply_params(specs: &[ParameterSpec], params: &ParamMap, mut apply: impl FnMut(&str, &ParamValue)) {
    for spec in specs {
        if let Some(raw) = params.get(&spec.name) {
            match spec.sanitize(raw) {
                Some(value) => apply(&spec.name, &value),
                None => tracing::debug!("忽略无法转换的参数 {} = {:?}", spec.name, raw),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_normalization() {
        let spec = ParameterSpec::int("kernelSize", "核大小", 15).range(3.0, 99.0).odd();
        assert_eq!(spec.sanitize(&ParamValue::Int(4)), Some(ParamValue::Int(5)));
        assert_eq!(spec.sanitize(&ParamValue::Int(1)), Some(ParamValue::Int(3)));
        assert_eq!(spec.sanitize(&ParamValue::Int(1000)), Some(ParamValue::Int(99)));
        assert_eq!(spec.sanitize(&ParamValue::Int(-8)), Some(ParamValue::Int(3)));
    }

    #[test]
    fn test_odd_steps_down_at_even_max() {
        let spec = ParameterSpec::int("k", "k", 3).range(1.0, 20.0).odd();
        assert_eq!(spec.sanitize(&ParamValue::Int(20)), Some(ParamValue::Int(19)));
    }

    #[test]
    fn test_float_clamp_and_conversion() {
        let spec = ParameterSpec::float("C", "常数C", 2.0).range(-50.0, 50.0);
        assert_eq!(spec.sanitize(&ParamValue::Float(120.5)), Some(ParamValue::Float(50.0)));
        assert_eq!(spec.sanitize(&ParamValue::Int(-7)), Some(ParamValue::Float(-7.0)));
        assert_eq!(spec.sanitize(&ParamValue::from("3.5")), Some(ParamValue::Float(3.5)));
        assert_eq!(spec.sanitize(&ParamValue::Float(f64::NAN)), None);
        assert_eq!(spec.sanitize(&ParamValue::from("abc")), None);
    }

    #[test]
    fn test_enum_by_name_or_index() {
        let spec = ParameterSpec::enumeration("method", "方法", 0, &["Mean", "Gaussian"]);
        assert_eq!(spec.sanitize(&ParamValue::from("Gaussian")), Some(ParamValue::Int(1)));
        assert_eq!(spec.sanitize(&ParamValue::Int(9)), Some(ParamValue::Int(1)));
        assert_eq!(spec.sanitize(&ParamValue::Int(-1)), Some(ParamValue::Int(0)));
    }

    #[test]
    fn test_loose_conversions() {
        assert_eq!(ParamValue::Float(4.9).as_i64(), Some(4));
        assert_eq!(ParamValue::from("12").as_i64(), Some(12));
        assert_eq!(ParamValue::from("yes").as_bool(), Some(true));
        assert_eq!(ParamValue::Int(0).as_bool(), Some(false));
        assert_eq!(ParamValue::from("maybe").as_bool(), None);
        assert_eq!(ParamValue::parse_loose("0.25"), ParamValue::Float(0.25));
        assert_eq!(ParamValue::parse_loose("7"), ParamValue::Int(7));
        assert_eq!(ParamValue::parse_loose("false"), ParamValue::Bool(false));
    }

    #[test]
    fn test_json_untagged_round_trip() {
        let map = params! { "a" => 1, "b" => 2.5, "c" => true, "d" => "x" };
        let json = serde_json::to_string(&map).unwrap();
        let back: ParamMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_apply_params_ignores_unknown() {
        let specs = vec![ParameterSpec::int("threshold", "阈值", 128).range(0.0, 255.0)];
        let input = params! { "threshold" => 999, "bogus" => 1 };
        let mut seen = Vec::new();
        apply_params(&specs, &input, |name, v| seen.push((name.to_string(), v.clone())));
        assert_eq!(seen, vec![("threshold".to_string(), ParamValue::Int(255))]);
    }
}
