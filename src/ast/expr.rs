//! Condition expressions.
//!
//! The JSON form is the one produced by policy-to-JSON tooling: every node
//! is an object with a single key naming the operator, e.g.
//! `{"&&": {"left": .., "right": ..}}`, `{".": {"left": .., "attr": "name"}}`
//! or `{"lessThan": [.., ..]}` for extension calls.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue, json};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::error::PolicyError;
use crate::extensions::ExtensionFunction;
use crate::types::{EntityType, Value};

use super::Pattern;

/// The four request variables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

/// Binary operators other than the short-circuiting `&&` and `||`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
pub enum BinaryOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "contains")]
    Contains,
    #[strum(serialize = "containsAll")]
    ContainsAll,
    #[strum(serialize = "containsAny")]
    ContainsAny,
}

impl BinaryOp {
    /// Whether the operator is written as a method call (`a.contains(b)`).
    pub fn is_method(self) -> bool {
        matches!(self, Self::Contains | Self::ContainsAll | Self::ContainsAny)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Value(Value),
    Var(Var),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    IsEmpty(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    GetAttr {
        expr: Box<Expr>,
        attr: String,
    },
    HasAttr {
        expr: Box<Expr>,
        attr: String,
    },
    Like {
        expr: Box<Expr>,
        pattern: Pattern,
    },
    Is {
        expr: Box<Expr>,
        entity_type: EntityType,
        in_expr: Option<Box<Expr>>,
    },
    Set(Vec<Expr>),
    Record(BTreeMap<String, Expr>),
    /// Extension function call; method syntax passes the receiver first.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

// Builders.
impl Expr {
    pub fn val(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    pub fn principal() -> Self {
        Expr::Var(Var::Principal)
    }

    pub fn action() -> Self {
        Expr::Var(Var::Action)
    }

    pub fn resource() -> Self {
        Expr::Var(Var::Resource)
    }

    pub fn context() -> Self {
        Expr::Var(Var::Context)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn neg(self) -> Self {
        Expr::Neg(Box::new(self))
    }

    pub fn is_empty(self) -> Self {
        Expr::IsEmpty(Box::new(self))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn is_in(self, right: Expr) -> Self {
        self.binary(BinaryOp::In, right)
    }

    pub fn contains(self, right: Expr) -> Self {
        self.binary(BinaryOp::Contains, right)
    }

    pub fn get_attr(self, attr: impl Into<String>) -> Self {
        Expr::GetAttr {
            expr: Box::new(self),
            attr: attr.into(),
        }
    }

    pub fn has_attr(self, attr: impl Into<String>) -> Self {
        Expr::HasAttr {
            expr: Box::new(self),
            attr: attr.into(),
        }
    }

    pub fn like(self, pattern: Pattern) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern,
        }
    }

    pub fn is_type(self, entity_type: EntityType) -> Self {
        Expr::Is {
            expr: Box::new(self),
            entity_type,
            in_expr: None,
        }
    }

    pub fn set(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Set(items.into_iter().collect())
    }

    pub fn record<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Expr)>) -> Self {
        Expr::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// `self.name(args..)`.
    pub fn method(self, name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args: std::iter::once(self).chain(args).collect(),
        }
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Value(_) | Expr::Var(_) => vec![],
            Expr::Not(e) | Expr::Neg(e) | Expr::IsEmpty(e) => vec![e.as_ref()],
            Expr::And(l, r) | Expr::Or(l, r) => vec![l.as_ref(), r.as_ref()],
            Expr::If {
                cond,
                then,
                otherwise,
            } => vec![cond.as_ref(), then.as_ref(), otherwise.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::GetAttr { expr, .. } | Expr::HasAttr { expr, .. } | Expr::Like { expr, .. } => {
                vec![expr.as_ref()]
            }
            Expr::Is { expr, in_expr, .. } => {
                std::iter::once(expr.as_ref()).chain(in_expr.as_deref()).collect()
            }
            Expr::Set(items) | Expr::Call { args: items, .. } => items.iter().collect(),
            Expr::Record(attrs) => attrs.values().collect(),
        }
    }
}

fn unary(arg: &Expr) -> JsonValue {
    json!({ "arg": arg.to_json() })
}

fn binary(left: &Expr, right: &Expr) -> JsonValue {
    json!({ "left": left.to_json(), "right": right.to_json() })
}

fn attr_access(expr: &Expr, attr: &str) -> JsonValue {
    json!({ "left": expr.to_json(), "attr": attr })
}

fn single(key: impl Into<String>, inner: JsonValue) -> JsonValue {
    let mut map = Map::new();
    map.insert(key.into(), inner);
    JsonValue::Object(map)
}

impl Expr {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Expr::Value(v) => single("Value", v.to_json()),
            Expr::Var(v) => single("Var", JsonValue::String(v.to_string())),
            Expr::Not(e) => single("!", unary(e)),
            Expr::Neg(e) => single("neg", unary(e)),
            Expr::IsEmpty(e) => single("isEmpty", unary(e)),
            Expr::And(l, r) => single("&&", binary(l, r)),
            Expr::Or(l, r) => single("||", binary(l, r)),
            Expr::If {
                cond,
                then,
                otherwise,
            } => single(
                "if-then-else",
                json!({ "if": cond.to_json(), "then": then.to_json(), "else": otherwise.to_json() }),
            ),
            Expr::Binary { op, left, right } => single(op.to_string(), binary(left, right)),
            Expr::GetAttr { expr, attr } => single(".", attr_access(expr, attr)),
            Expr::HasAttr { expr, attr } => single("has", attr_access(expr, attr)),
            Expr::Like { expr, pattern } => single(
                "like",
                json!({ "left": expr.to_json(), "pattern": pattern }),
            ),
            Expr::Is {
                expr,
                entity_type,
                in_expr,
            } => {
                let mut inner = Map::new();
                inner.insert("left".to_string(), expr.to_json());
                inner.insert(
                    "entity_type".to_string(),
                    JsonValue::String(entity_type.to_string()),
                );
                if let Some(in_expr) = in_expr {
                    inner.insert("in".to_string(), in_expr.to_json());
                }
                single("is", JsonValue::Object(inner))
            }
            Expr::Set(items) => single(
                "Set",
                JsonValue::Array(items.iter().map(Expr::to_json).collect()),
            ),
            Expr::Record(attrs) => single(
                "Record",
                JsonValue::Object(attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            ),
            Expr::Call { name, args } => single(
                name.clone(),
                JsonValue::Array(args.iter().map(Expr::to_json).collect()),
            ),
        }
    }

    pub fn from_json(json: &JsonValue) -> Result<Expr, PolicyError> {
        let map = json
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| invalid(format!("expected a single-key object, got {json}")))?;
        // A single entry is guaranteed by the filter above.
        let Some((key, inner)) = map.iter().next() else {
            return Err(invalid(format!("empty expression object {json}")));
        };

        match key.as_str() {
            "Value" => Ok(Expr::Value(Value::from_json(inner)?)),
            "Var" => {
                let name = inner
                    .as_str()
                    .ok_or_else(|| invalid(format!("`Var` must be a string, got {inner}")))?;
                Var::from_str(name)
                    .map(Expr::Var)
                    .map_err(|_| invalid(format!("unknown variable `{name}`")))
            }
            "Slot" => Err(invalid(
                "slots may only appear in the policy scope".to_string(),
            )),
            "!" => Ok(Expr::Not(Box::new(field(inner, "arg")?))),
            "neg" => Ok(Expr::Neg(Box::new(field(inner, "arg")?))),
            "isEmpty" => Ok(Expr::IsEmpty(Box::new(field(inner, "arg")?))),
            "&&" => Ok(Expr::And(
                Box::new(field(inner, "left")?),
                Box::new(field(inner, "right")?),
            )),
            "||" => Ok(Expr::Or(
                Box::new(field(inner, "left")?),
                Box::new(field(inner, "right")?),
            )),
            "if-then-else" => Ok(Expr::If {
                cond: Box::new(field(inner, "if")?),
                then: Box::new(field(inner, "then")?),
                otherwise: Box::new(field(inner, "else")?),
            }),
            "." => Ok(Expr::GetAttr {
                expr: Box::new(field(inner, "left")?),
                attr: string_field(inner, "attr")?,
            }),
            "has" => Ok(Expr::HasAttr {
                expr: Box::new(field(inner, "left")?),
                attr: string_field(inner, "attr")?,
            }),
            "like" => {
                let pattern = inner
                    .get("pattern")
                    .ok_or_else(|| invalid(format!("`like` is missing `pattern` in {inner}")))?;
                Ok(Expr::Like {
                    expr: Box::new(field(inner, "left")?),
                    pattern: serde_json::from_value(pattern.clone())?,
                })
            }
            "is" => Ok(Expr::Is {
                expr: Box::new(field(inner, "left")?),
                entity_type: string_field(inner, "entity_type")?.parse()?,
                in_expr: inner
                    .get("in")
                    .map(|e| Expr::from_json(e).map(Box::new))
                    .transpose()?,
            }),
            "Set" => inner
                .as_array()
                .ok_or_else(|| invalid(format!("`Set` must be an array, got {inner}")))?
                .iter()
                .map(Expr::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::Set),
            "Record" => inner
                .as_object()
                .ok_or_else(|| invalid(format!("`Record` must be an object, got {inner}")))?
                .iter()
                .map(|(k, v)| Ok((k.clone(), Expr::from_json(v)?)))
                .collect::<Result<BTreeMap<_, _>, PolicyError>>()
                .map(Expr::Record),
            other => {
                if let Ok(op) = BinaryOp::from_str(other) {
                    return Ok(Expr::Binary {
                        op,
                        left: Box::new(field(inner, "left")?),
                        right: Box::new(field(inner, "right")?),
                    });
                }
                let args = inner
                    .as_array()
                    .ok_or_else(|| {
                        invalid(format!("arguments of `{other}` must be an array, got {inner}"))
                    })?
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Call {
                    name: other.to_string(),
                    args,
                })
            }
        }
    }
}

fn invalid(message: String) -> PolicyError {
    PolicyError::InvalidFormat(message)
}

fn field(inner: &JsonValue, name: &str) -> Result<Expr, PolicyError> {
    inner
        .get(name)
        .ok_or_else(|| invalid(format!("missing `{name}` in {inner}")))
        .and_then(Expr::from_json)
}

fn string_field(inner: &JsonValue, name: &str) -> Result<String, PolicyError> {
    inner
        .get(name)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("missing string `{name}` in {inner}")))
}

impl Serialize for Expr {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(ser)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = JsonValue::deserialize(de)?;
        Expr::from_json(&json).map_err(D::Error::custom)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Expr::Value(v) => write!(f, "{v}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Not(e) => write!(f, "!({e})"),
            Expr::Neg(e) => write!(f, "-({e})"),
            Expr::IsEmpty(e) => write!(f, "{e}.isEmpty()"),
            Expr::And(l, r) => write!(f, "({l} && {r})"),
            Expr::Or(l, r) => write!(f, "({l} || {r})"),
            Expr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "(if {cond} then {then} else {otherwise})"),
            Expr::Binary { op, left, right } if op.is_method() => {
                write!(f, "{left}.{op}({right})")
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::GetAttr { expr, attr } => write!(f, "{expr}.{attr}"),
            Expr::HasAttr { expr, attr } => write!(f, "({expr} has {attr})"),
            Expr::Like { expr, pattern } => write!(f, "({expr} like \"{pattern}\")"),
            Expr::Is {
                expr,
                entity_type,
                in_expr: None,
            } => write!(f, "({expr} is {entity_type})"),
            Expr::Is {
                expr,
                entity_type,
                in_expr: Some(in_expr),
            } => write!(f, "({expr} is {entity_type} in {in_expr})"),
            Expr::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            Expr::Record(attrs) => write!(
                f,
                "{{{}}}",
                attrs.iter().map(|(k, v)| format!("{k:?}: {v}")).join(", ")
            ),
            Expr::Call { name, args } => {
                let is_constructor = ExtensionFunction::from_str(name)
                    .map(ExtensionFunction::is_constructor)
                    .unwrap_or(true);
                match args.split_first() {
                    Some((receiver, rest)) if !is_constructor => {
                        write!(f, "{receiver}.{name}({})", rest.iter().join(", "))
                    }
                    _ => write!(f, "{name}({})", args.iter().join(", ")),
                }
            }
        }
    }
}
