//! Property types and typed values.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The fixed enumeration of repository property types.
///
/// Discriminants follow the numeric codes used on the wire by repository
/// backends, so `PropertyType::from_code(t as u8)` round-trips.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyType {
    Undefined = 0,
    String = 1,
    Binary = 2,
    Long = 3,
    Double = 4,
    Date = 5,
    Boolean = 6,
    Name = 7,
    Path = 8,
    Reference = 9,
    WeakReference = 10,
    Uri = 11,
    Decimal = 12,
}

impl PropertyType {
    /// All types in code order.
    pub const ALL: [PropertyType; 13] = [
        PropertyType::Undefined,
        PropertyType::String,
        PropertyType::Binary,
        PropertyType::Long,
        PropertyType::Double,
        PropertyType::Date,
        PropertyType::Boolean,
        PropertyType::Name,
        PropertyType::Path,
        PropertyType::Reference,
        PropertyType::WeakReference,
        PropertyType::Uri,
        PropertyType::Decimal,
    ];

    /// The canonical type name, e.g. `"WeakReference"`.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::Undefined => "undefined",
            PropertyType::String => "String",
            PropertyType::Binary => "Binary",
            PropertyType::Long => "Long",
            PropertyType::Double => "Double",
            PropertyType::Date => "Date",
            PropertyType::Boolean => "Boolean",
            PropertyType::Name => "Name",
            PropertyType::Path => "Path",
            PropertyType::Reference => "Reference",
            PropertyType::WeakReference => "WeakReference",
            PropertyType::Uri => "URI",
            PropertyType::Decimal => "Decimal",
        }
    }

    /// Look up a type by its numeric code.
    pub fn from_code(code: u8) -> Result<Self, TypeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as u8 == code)
            .ok_or_else(|| TypeError::UnknownType(code.to_string()))
    }

    /// Infer the type of a value that carries no declaration.
    pub fn determine(value: &Value) -> Self {
        match value {
            Value::String(_) => PropertyType::String,
            Value::Binary(_) => PropertyType::Binary,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Date(_) => PropertyType::Date,
            Value::Boolean(_) => PropertyType::Boolean,
        }
    }

    /// Types whose values are carried as strings.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            PropertyType::String
                | PropertyType::Name
                | PropertyType::Path
                | PropertyType::Reference
                | PropertyType::WeakReference
                | PropertyType::Uri
                | PropertyType::Decimal
        )
    }

    /// Types that point at another node.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            PropertyType::Reference | PropertyType::WeakReference | PropertyType::Path
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropertyType {
    type Err = TypeError;

    /// Parse a type name case-insensitively. Numeric codes are accepted too,
    /// since some backends declare types by code instead of by name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownType(s.to_string()))
    }
}

/// A single typed value.
///
/// String-like property types (names, paths, references, URIs, decimals)
/// are all carried as [`Value::String`]; the declared [`PropertyType`] of the
/// owning property gives them their meaning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Binary(Bytes),
    Long(i64),
    Double(f64),
    Date(DateTime<FixedOffset>),
    Boolean(bool),
}

impl Value {
    /// Borrow the string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The natural type of this value.
    pub fn natural_type(&self) -> PropertyType {
        PropertyType::determine(self)
    }

    /// Convert this value to the representation required by `target`.
    ///
    /// Conversions follow the repository value conversion table: anything
    /// converts to a string-like type, strings parse into numbers, booleans
    /// and dates, numbers and dates convert into each other through epoch
    /// milliseconds, and everything else is rejected.
    pub fn convert(&self, target: PropertyType) -> Result<Value, TypeError> {
        let from = self.natural_type();
        let fail = |reason: &str| TypeError::Conversion {
            from,
            to: target,
            reason: reason.to_string(),
        };

        match target {
            PropertyType::Undefined => Ok(self.clone()),
            t if t.is_string_like() => match self {
                Value::Binary(b) => String::from_utf8(b.to_vec())
                    .map(Value::String)
                    .map_err(|_| fail("binary is not valid UTF-8")),
                other => Ok(Value::String(other.to_string())),
            },
            PropertyType::Binary => match self {
                Value::Binary(b) => Ok(Value::Binary(b.clone())),
                other => Ok(Value::Binary(Bytes::from(other.to_string()))),
            },
            PropertyType::Long => match self {
                Value::Long(v) => Ok(Value::Long(*v)),
                Value::Double(v) => Ok(Value::Long(*v as i64)),
                Value::Date(d) => Ok(Value::Long(d.timestamp_millis())),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Long)
                    .map_err(|e| fail(&e.to_string())),
                _ => Err(fail("not convertible")),
            },
            PropertyType::Double => match self {
                Value::Double(v) => Ok(Value::Double(*v)),
                Value::Long(v) => Ok(Value::Double(*v as f64)),
                Value::Date(d) => Ok(Value::Double(d.timestamp_millis() as f64)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| fail(&e.to_string())),
                _ => Err(fail("not convertible")),
            },
            PropertyType::Boolean => match self {
                Value::Boolean(b) => Ok(Value::Boolean(*b)),
                Value::String(s) => Ok(Value::Boolean(s.trim().eq_ignore_ascii_case("true"))),
                Value::Binary(b) => Ok(Value::Boolean(
                    String::from_utf8_lossy(b).trim().eq_ignore_ascii_case("true"),
                )),
                _ => Err(fail("not convertible")),
            },
            PropertyType::Date => match self {
                Value::Date(d) => Ok(Value::Date(*d)),
                Value::Long(ms) => millis_to_date(*ms).ok_or_else(|| fail("out of range")),
                Value::Double(ms) => {
                    millis_to_date(*ms as i64).ok_or_else(|| fail("out of range"))
                }
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(Value::Date)
                    .map_err(|e| fail(&e.to_string())),
                _ => Err(fail("not convertible")),
            },
            _ => Err(fail("not convertible")),
        }
    }
}

fn millis_to_date(ms: i64) -> Option<Value> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| Value::Date(d.fixed_offset()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Date(d) => f.write_str(&d.to_rfc3339()),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Binary(b)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(d: DateTime<FixedOffset>) -> Self {
        Value::Date(d)
    }
}

/// A scalar or multi-valued property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Single(Value),
    Multiple(Vec<Value>),
}

impl PropertyValue {
    /// Returns `true` for multi-valued properties.
    pub fn is_multiple(&self) -> bool {
        matches!(self, PropertyValue::Multiple(_))
    }

    /// All values as a slice (one element for scalar values).
    pub fn values(&self) -> &[Value] {
        match self {
            PropertyValue::Single(v) => std::slice::from_ref(v),
            PropertyValue::Multiple(vs) => vs,
        }
    }

    /// The first value, if any.
    pub fn first(&self) -> Option<&Value> {
        self.values().first()
    }

    /// Borrow the scalar string content, if this is a single string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Single(v) => v.as_str(),
            PropertyValue::Multiple(_) => None,
        }
    }

    /// The type a value with no declared type is stored as.
    pub fn natural_type(&self) -> PropertyType {
        self.first()
            .map(Value::natural_type)
            .unwrap_or(PropertyType::String)
    }

    /// Convert every value to `target`, keeping the cardinality.
    pub fn convert(&self, target: PropertyType) -> Result<PropertyValue, TypeError> {
        match self {
            PropertyValue::Single(v) => Ok(PropertyValue::Single(v.convert(target)?)),
            PropertyValue::Multiple(vs) => vs
                .iter()
                .map(|v| v.convert(target))
                .collect::<Result<Vec<_>, _>>()
                .map(PropertyValue::Multiple),
        }
    }

    /// Append a value, turning a scalar into a multi-valued value.
    pub fn push(&mut self, value: Value) {
        match self {
            PropertyValue::Single(v) => {
                *self = PropertyValue::Multiple(vec![v.clone(), value]);
            }
            PropertyValue::Multiple(vs) => vs.push(value),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Single(v) => write!(f, "{v}"),
            PropertyValue::Multiple(vs) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

macro_rules! single_value_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for PropertyValue {
                fn from(v: $t) -> Self {
                    PropertyValue::Single(Value::from(v))
                }
            }
        )*
    };
}

single_value_from!(&str, String, i64, f64, bool, Bytes, DateTime<FixedOffset>);

impl From<Value> for PropertyValue {
    fn from(v: Value) -> Self {
        PropertyValue::Single(v)
    }
}

impl From<Vec<Value>> for PropertyValue {
    fn from(vs: Vec<Value>) -> Self {
        PropertyValue::Multiple(vs)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(vs: Vec<&str>) -> Self {
        PropertyValue::Multiple(vs.into_iter().map(Value::from).collect())
    }
}

/// Byte length(s) of a binary property whose content has not been loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryLength {
    Single(u64),
    Multiple(Vec<u64>),
}

impl BinaryLength {
    /// Returns `true` for multi-valued binaries.
    pub fn is_multiple(&self) -> bool {
        matches!(self, BinaryLength::Multiple(_))
    }

    /// Sum of all lengths.
    pub fn total(&self) -> u64 {
        match self {
            BinaryLength::Single(n) => *n,
            BinaryLength::Multiple(ns) => ns.iter().sum(),
        }
    }
}
