//! Extension values: decimals, IP addresses/networks and 256-bit unsigned
//! integers, together with the function catalogue that constructs and
//! compares them.
//!
//! Every operator checks the tag of its operands; applying a decimal
//! operator to an IP value (or any other mismatch) is an [`EvalError`],
//! never a panic.

mod decimal;
mod ipaddr;
mod u256;

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::error::EvalError;
use crate::types::Value;

pub use decimal::{Decimal, NUM_DIGITS};
pub use ipaddr::IpAddress;
pub use u256::U256;

/// The kinds of extension values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
)]
pub enum ExtensionKind {
    #[serde(rename = "decimal")]
    #[strum(serialize = "decimal")]
    Decimal,
    #[serde(rename = "ipaddr")]
    #[strum(serialize = "ipaddr")]
    IpAddr,
    #[serde(rename = "u256")]
    #[strum(serialize = "u256")]
    U256,
}

/// Failure to construct an extension value from its literal form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtensionParseError {
    #[error("`{0}` is not a well-formed decimal literal")]
    DecimalFormat(String),

    #[error("`{0}` has more than {NUM_DIGITS} digits after the decimal point")]
    DecimalTooManyDigits(String),

    #[error("`{0}` is out of range for a decimal")]
    DecimalOverflow(String),

    #[error("`{input}` is not a valid IP address or network: {reason}")]
    IpFormat { input: String, reason: String },

    #[error("u256 literal is empty")]
    U256Empty,

    #[error("`{0}` contains characters other than decimal digits")]
    U256Format(String),

    #[error("`{0}` is out of range for a u256")]
    U256Overflow(String),
}

impl ExtensionParseError {
    pub fn extension(&self) -> ExtensionKind {
        match self {
            Self::DecimalFormat(_) | Self::DecimalTooManyDigits(_) | Self::DecimalOverflow(_) => {
                ExtensionKind::Decimal
            }
            Self::IpFormat { .. } => ExtensionKind::IpAddr,
            Self::U256Empty | Self::U256Format(_) | Self::U256Overflow(_) => ExtensionKind::U256,
        }
    }
}

/// A constructed extension value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionValue {
    Decimal(Decimal),
    IpAddr(IpAddress),
    U256(U256),
}

impl ExtensionValue {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Self::Decimal(_) => ExtensionKind::Decimal,
            Self::IpAddr(_) => ExtensionKind::IpAddr,
            Self::U256(_) => ExtensionKind::U256,
        }
    }

    /// The function that rebuilds this value from [`Self::argument`].
    pub fn constructor(&self) -> ExtensionFunction {
        match self {
            Self::Decimal(_) => ExtensionFunction::Decimal,
            Self::IpAddr(_) => ExtensionFunction::Ip,
            Self::U256(_) => ExtensionFunction::U256,
        }
    }

    /// The literal string argument of the constructor call.
    pub fn argument(&self) -> String {
        match self {
            Self::Decimal(d) => d.to_string(),
            Self::IpAddr(ip) => ip.to_string(),
            Self::U256(n) => n.to_string(),
        }
    }

    /// Construct a value by constructor name, e.g. `("decimal", "1.5")`.
    pub fn construct(name: &str, arg: &str) -> Result<Self, EvalError> {
        let function = ExtensionFunction::from_str(name).map_err(|_| EvalError::UnknownFunction {
            name: name.to_string(),
        })?;
        match function.call(vec![Value::String(arg.to_string())])? {
            Value::Extension(value) => Ok(value),
            other => Err(EvalError::type_error("extension value", other.type_name())),
        }
    }
}

impl Display for ExtensionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}(\"{}\")", self.constructor(), self.argument())
    }
}

impl From<Decimal> for ExtensionValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<IpAddress> for ExtensionValue {
    fn from(value: IpAddress) -> Self {
        Self::IpAddr(value)
    }
}

impl From<U256> for ExtensionValue {
    fn from(value: U256) -> Self {
        Self::U256(value)
    }
}

/// Parameter types used in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Extension(ExtensionKind),
    /// A decimal or a u256; all comparable parameters of one call share a kind.
    Comparable,
}

/// Result types used in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Bool,
    Extension(ExtensionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ParamType],
    pub ret: ReturnType,
}

const COMPARISON: Signature = Signature {
    params: &[ParamType::Comparable, ParamType::Comparable],
    ret: ReturnType::Bool,
};

const IP_PREDICATE: Signature = Signature {
    params: &[ParamType::Extension(ExtensionKind::IpAddr)],
    ret: ReturnType::Bool,
};

/// The closed catalogue of extension functions, looked up by their
/// camelCase names (`decimal`, `isInRange`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, StrumDisplay, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum ExtensionFunction {
    Decimal,
    Ip,
    U256,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    IsIpv4,
    IsIpv6,
    IsLoopback,
    IsMulticast,
    IsInRange,
}

impl ExtensionFunction {
    pub fn signature(self) -> Signature {
        match self {
            Self::Decimal => Signature {
                params: &[ParamType::String],
                ret: ReturnType::Extension(ExtensionKind::Decimal),
            },
            Self::Ip => Signature {
                params: &[ParamType::String],
                ret: ReturnType::Extension(ExtensionKind::IpAddr),
            },
            Self::U256 => Signature {
                params: &[ParamType::String],
                ret: ReturnType::Extension(ExtensionKind::U256),
            },
            Self::LessThan | Self::LessThanOrEqual | Self::GreaterThan | Self::GreaterThanOrEqual => {
                COMPARISON
            }
            Self::IsIpv4 | Self::IsIpv6 | Self::IsLoopback | Self::IsMulticast => IP_PREDICATE,
            Self::IsInRange => Signature {
                params: &[
                    ParamType::Extension(ExtensionKind::IpAddr),
                    ParamType::Extension(ExtensionKind::IpAddr),
                ],
                ret: ReturnType::Bool,
            },
        }
    }

    pub fn is_constructor(self) -> bool {
        matches!(self, Self::Decimal | Self::Ip | Self::U256)
    }

    /// Apply the function to already-evaluated arguments.
    pub fn call(self, args: Vec<Value>) -> Result<Value, EvalError> {
        let expected = self.signature().params.len();
        if args.len() != expected {
            return Err(EvalError::WrongArity {
                name: self.to_string(),
                expected,
                actual: args.len(),
            });
        }

        match self {
            Self::Decimal => {
                let d: Decimal = string_arg(&args[0])?.parse()?;
                Ok(Value::Extension(d.into()))
            }
            Self::Ip => {
                let ip: IpAddress = string_arg(&args[0])?.parse()?;
                Ok(Value::Extension(ip.into()))
            }
            Self::U256 => {
                let n: U256 = string_arg(&args[0])?.parse()?;
                Ok(Value::Extension(n.into()))
            }
            Self::LessThan => compare(&args[0], &args[1]).map(|o| Value::Bool(o.is_lt())),
            Self::LessThanOrEqual => compare(&args[0], &args[1]).map(|o| Value::Bool(o.is_le())),
            Self::GreaterThan => compare(&args[0], &args[1]).map(|o| Value::Bool(o.is_gt())),
            Self::GreaterThanOrEqual => {
                compare(&args[0], &args[1]).map(|o| Value::Bool(o.is_ge()))
            }
            Self::IsIpv4 => ip_arg(&args[0]).map(|ip| Value::Bool(ip.is_ipv4())),
            Self::IsIpv6 => ip_arg(&args[0]).map(|ip| Value::Bool(ip.is_ipv6())),
            Self::IsLoopback => ip_arg(&args[0]).map(|ip| Value::Bool(ip.is_loopback())),
            Self::IsMulticast => ip_arg(&args[0]).map(|ip| Value::Bool(ip.is_multicast())),
            Self::IsInRange => {
                let addr = ip_arg(&args[0])?;
                let range = ip_arg(&args[1])?;
                Ok(Value::Bool(addr.is_in_range(range)))
            }
        }
    }
}

fn string_arg(value: &Value) -> Result<&str, EvalError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(EvalError::type_error("string", other.type_name())),
    }
}

fn ip_arg(value: &Value) -> Result<&IpAddress, EvalError> {
    match value {
        Value::Extension(ExtensionValue::IpAddr(ip)) => Ok(ip),
        other => Err(EvalError::type_error(
            ExtensionKind::IpAddr.to_string(),
            other.type_name(),
        )),
    }
}

/// Compare two decimals or two u256 values. The receiver's tag decides what
/// the argument must be.
fn compare(left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    match (left, right) {
        (
            Value::Extension(ExtensionValue::Decimal(a)),
            Value::Extension(ExtensionValue::Decimal(b)),
        ) => Ok(a.cmp(b)),
        (Value::Extension(ExtensionValue::U256(a)), Value::Extension(ExtensionValue::U256(b))) => {
            Ok(a.cmp(b))
        }
        (Value::Extension(ExtensionValue::Decimal(_)), other) => Err(EvalError::type_error(
            ExtensionKind::Decimal.to_string(),
            other.type_name(),
        )),
        (Value::Extension(ExtensionValue::U256(_)), other) => Err(EvalError::type_error(
            ExtensionKind::U256.to_string(),
            other.type_name(),
        )),
        (other, _) => Err(EvalError::type_error("decimal or u256", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn ext(name: &str, arg: &str) -> Value {
        Value::Extension(ExtensionValue::construct(name, arg).unwrap())
    }

    #[parameterized(
        decimal = { "decimal", ExtensionFunction::Decimal },
        ip = { "ip", ExtensionFunction::Ip },
        u256 = { "u256", ExtensionFunction::U256 },
        less_than = { "lessThan", ExtensionFunction::LessThan },
        greater_than_or_equal = { "greaterThanOrEqual", ExtensionFunction::GreaterThanOrEqual },
        is_ipv4 = { "isIpv4", ExtensionFunction::IsIpv4 },
        is_in_range = { "isInRange", ExtensionFunction::IsInRange },
    )]
    fn test_function_names(name: &str, function: ExtensionFunction) {
        assert_eq!(ExtensionFunction::from_str(name).unwrap(), function);
        assert_eq!(function.to_string(), name);
    }

    #[test]
    fn test_unknown_function() {
        let err = ExtensionValue::construct("datetime", "2024-01-01").unwrap_err();
        assert!(matches!(err, EvalError::UnknownFunction { .. }));
    }

    #[parameterized(
        decimal_less = { "lessThan", "decimal", "0.0001", "0.9", true },
        decimal_not_less = { "lessThan", "decimal", "0.9", "0.0001", false },
        decimal_le_equal = { "lessThanOrEqual", "decimal", "1.5", "1.50", true },
        decimal_greater = { "greaterThan", "decimal", "0.455", "0.3", true },
        decimal_ge = { "greaterThanOrEqual", "decimal", "-1.0", "-1.0", true },
        u256_greater = { "greaterThan", "u256", "100000000000000", "2345", true },
        u256_less = { "lessThan", "u256", "100000000000000", "2345", false },
    )]
    fn test_comparisons(function: &str, kind: &str, left: &str, right: &str, expected: bool) {
        let function = ExtensionFunction::from_str(function).unwrap();
        let result = function.call(vec![ext(kind, left), ext(kind, right)]).unwrap();
        assert_eq!(result, Value::Bool(expected));
    }

    #[test]
    fn test_comparison_tag_mismatch_is_type_error() {
        let err = ExtensionFunction::LessThan
            .call(vec![ext("decimal", "1.0"), ext("u256", "1")])
            .unwrap_err();
        assert_eq!(err, EvalError::type_error("decimal", "u256"));

        let err = ExtensionFunction::GreaterThan
            .call(vec![ext("u256", "1"), ext("decimal", "1.0")])
            .unwrap_err();
        assert_eq!(err, EvalError::type_error("u256", "decimal"));
    }

    #[test]
    fn test_ip_operator_on_decimal_is_type_error() {
        let err = ExtensionFunction::IsIpv4
            .call(vec![ext("decimal", "1.0")])
            .unwrap_err();
        assert_eq!(err, EvalError::type_error("ipaddr", "decimal"));
    }

    #[test]
    fn test_constructor_parse_error() {
        let err = ExtensionFunction::Decimal
            .call(vec![Value::String("0.00001".into())])
            .unwrap_err();
        assert!(matches!(err, EvalError::ExtensionParse { ref extension, .. } if extension == "decimal"));
    }

    #[test]
    fn test_constructor_requires_string() {
        let err = ExtensionFunction::U256.call(vec![Value::Long(1)]).unwrap_err();
        assert_eq!(err, EvalError::type_error("string", "long"));
    }

    #[test]
    fn test_wrong_arity() {
        let err = ExtensionFunction::IsInRange
            .call(vec![ext("ip", "10.0.0.1")])
            .unwrap_err();
        assert!(matches!(err, EvalError::WrongArity { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_is_in_range() {
        let result = ExtensionFunction::IsInRange
            .call(vec![ext("ip", "192.168.0.7"), ext("ip", "192.168.0.0/24")])
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_display_round_trips_through_constructor() {
        for (name, arg) in [("decimal", "0.455"), ("ip", "10.0.0.0/8"), ("u256", "2345")] {
            let value = ExtensionValue::construct(name, arg).unwrap();
            let rebuilt =
                ExtensionValue::construct(&value.constructor().to_string(), &value.argument())
                    .unwrap();
            assert_eq!(value, rebuilt);
        }
        let value = ExtensionValue::construct("decimal", "0.455").unwrap();
        assert_eq!(value.to_string(), "decimal(\"0.455\")");
    }
}
