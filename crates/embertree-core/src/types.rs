//! Value types and element contents

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a parameter
///
/// Enumerated parameters carry their selected index as an `Integer` with
/// [`ParameterType::Enum`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Octets(Vec<u8>),
}

impl Value {
    /// Integer view of the value; reals only convert when whole and in range
    pub fn as_i64(&self) -> Option<i64> {
        const LIMIT: f64 = 9_223_372_036_854_775_808.0;
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 && *f >= -LIMIT && *f < LIMIT => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Non-negative integer values, used for counts and matrix ids
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|i| u32::try_from(i).ok())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Octets(o) => write!(f, "<{} octets>", o.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Octets(v)
    }
}

/// Parameter value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterType {
    Null,
    Integer,
    Real,
    #[default]
    String,
    Boolean,
    Trigger,
    Enum,
    Octets,
}

impl ParameterType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(ParameterType::Null),
            "integer" => Some(ParameterType::Integer),
            "real" => Some(ParameterType::Real),
            "string" => Some(ParameterType::String),
            "boolean" => Some(ParameterType::Boolean),
            "trigger" => Some(ParameterType::Trigger),
            "enum" => Some(ParameterType::Enum),
            "octets" => Some(ParameterType::Octets),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParameterType::Null => "null",
            ParameterType::Integer => "integer",
            ParameterType::Real => "real",
            ParameterType::String => "string",
            ParameterType::Boolean => "boolean",
            ParameterType::Trigger => "trigger",
            ParameterType::Enum => "enum",
            ParameterType::Octets => "octets",
        }
    }
}

/// Parameter access levels, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ParameterAccess {
    None = 0,
    #[default]
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl ParameterAccess {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(ParameterAccess::None),
            "read" => Some(ParameterAccess::Read),
            "write" => Some(ParameterAccess::Write),
            "readWrite" => Some(ParameterAccess::ReadWrite),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParameterAccess::None => "none",
            ParameterAccess::Read => "read",
            ParameterAccess::Write => "write",
            ParameterAccess::ReadWrite => "readWrite",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Writes are allowed above read-only
    pub fn can_write(&self) -> bool {
        self.level() > ParameterAccess::Read.level()
    }
}

/// Matrix topologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixType {
    /// A source drives at most one target, a target carries at most one source
    OneToOne,
    /// A target carries exactly one source, a source may drive many targets
    #[default]
    OneToN,
    /// Free cross-point matrix bounded by connect limits
    NToN,
}

impl MatrixType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "oneToOne" => Some(MatrixType::OneToOne),
            "oneToN" => Some(MatrixType::OneToN),
            "nToN" => Some(MatrixType::NToN),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MatrixType::OneToOne => "oneToOne",
            MatrixType::OneToN => "oneToN",
            MatrixType::NToN => "nToN",
        }
    }
}

/// Matrix addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixMode {
    #[default]
    Linear,
    NonLinear,
}

impl MatrixMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(MatrixMode::Linear),
            "nonLinear" => Some(MatrixMode::NonLinear),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MatrixMode::Linear => "linear",
            MatrixMode::NonLinear => "nonLinear",
        }
    }
}

/// Requested connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixOperation {
    /// Replace the target's sources
    #[default]
    Absolute,
    /// Add to the target's sources
    Connect,
    /// Remove from the target's sources
    Disconnect,
}

/// Outcome of one target's connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixDisposition {
    /// Rejected or no-op; sources reflect current state
    Tally,
    /// Applied
    Modified,
    /// Accepted but not yet applied
    Pending,
    /// Target is not user-mutable
    Locked,
}

/// Node contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
}

/// Parameter contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<ParameterType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<ParameterAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_identifier: Option<i32>,
}

impl ParameterContents {
    pub fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn is_writable(&self) -> bool {
        self.access.map(|a| a.can_write()).unwrap_or(false)
    }
}

/// Label block reference for a matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub base_path: crate::TreePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Largest target or source count a matrix may declare
pub const MAX_MATRIX_SIZE: u32 = 65_536;

/// Matrix contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub matrix_type: MatrixType,
    #[serde(default)]
    pub mode: MatrixMode,
    pub target_count: u32,
    pub source_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_total_connects: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_connects_per_target: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

impl MatrixContents {
    pub fn new(matrix_type: MatrixType, target_count: u32, source_count: u32) -> Self {
        Self {
            matrix_type,
            target_count,
            source_count,
            ..Default::default()
        }
    }

    /// Assign a named contents field, returning false when the field is
    /// unknown or the value has the wrong shape
    pub fn set_field(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "identifier" => match value.as_str() {
                Some(s) => {
                    self.identifier = Some(s.to_string());
                    true
                }
                None => false,
            },
            "description" => match value.as_str() {
                Some(s) => {
                    self.description = Some(s.to_string());
                    true
                }
                None => false,
            },
            "targetCount" => assign_count(&mut self.target_count, value),
            "sourceCount" => assign_count(&mut self.source_count, value),
            "maximumTotalConnects" => match value.as_u32() {
                Some(n) => {
                    self.maximum_total_connects = Some(n);
                    true
                }
                None => false,
            },
            "maximumConnectsPerTarget" => match value.as_u32() {
                Some(n) => {
                    self.maximum_connects_per_target = Some(n);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

fn assign_count(slot: &mut u32, value: &Value) -> bool {
    match value.as_u32() {
        Some(n) if n <= MAX_MATRIX_SIZE => {
            *slot = n;
            true
        }
        _ => false,
    }
}

/// One argument or result slot of a function signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgument {
    pub arg_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Function contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<FunctionArgument>,
    #[serde(default)]
    pub result: Vec<FunctionArgument>,
}
