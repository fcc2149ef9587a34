//! Static typing of condition expressions in one request environment.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;

use crate::ast::{BinaryOp, Expr, Var};
use crate::extensions::{ExtensionFunction, ExtensionKind, ParamType, ReturnType};
use crate::schema::{RecordType, Schema, SchemaType};
use crate::types::{EntityType, EntityUid, Value};

use super::ValidationErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrType {
    ty: Type,
    required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Type {
    /// Element type of the empty set.
    Never,
    /// Unknown; produced after an error or by undeclared attributes of open
    /// records. Compatible with everything.
    Any,
    Bool,
    Long,
    String,
    Set(Box<Type>),
    Record {
        attrs: BTreeMap<String, AttrType>,
        open: bool,
    },
    /// An entity of one of the listed types.
    Entity(BTreeSet<EntityType>),
    Extension(ExtensionKind),
}

impl Type {
    pub(crate) fn entity(ty: EntityType) -> Self {
        Type::Entity(BTreeSet::from([ty]))
    }

    fn record(record: &RecordType) -> Self {
        Type::Record {
            attrs: record
                .attrs
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        AttrType {
                            ty: Type::from(&attr.ty),
                            required: attr.required,
                        },
                    )
                })
                .collect(),
            open: record.additional_attributes,
        }
    }

    pub(crate) fn context(record: &RecordType) -> Self {
        Self::record(record)
    }

    fn is_entity_like(&self) -> bool {
        matches!(self, Type::Entity(_) | Type::Any | Type::Never)
    }

    /// Least upper bound, or `None` when the types have nothing in common.
    fn lub(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (Type::Any, _) | (_, Type::Any) => Some(Type::Any),
            (Type::Never, t) | (t, Type::Never) => Some(t.clone()),
            (Type::Entity(a), Type::Entity(b)) => Some(Type::Entity(a.union(b).cloned().collect())),
            (Type::Set(a), Type::Set(b)) => a.lub(b).map(|t| Type::Set(Box::new(t))),
            (
                Type::Record {
                    attrs: a,
                    open: a_open,
                },
                Type::Record {
                    attrs: b,
                    open: b_open,
                },
            ) => {
                let mut attrs = BTreeMap::new();
                for (name, left) in a {
                    if let Some(right) = b.get(name) {
                        let ty = left.ty.lub(&right.ty)?;
                        attrs.insert(
                            name.clone(),
                            AttrType {
                                ty,
                                required: left.required && right.required,
                            },
                        );
                    }
                }
                let open = *a_open || *b_open || attrs.len() != a.len() || attrs.len() != b.len();
                Some(Type::Record { attrs, open })
            }
            (a, b) if a == b => Some(a.clone()),
            _ => None,
        }
    }
}

impl From<&SchemaType> for Type {
    fn from(ty: &SchemaType) -> Self {
        match ty {
            SchemaType::Bool => Type::Bool,
            SchemaType::Long => Type::Long,
            SchemaType::String => Type::String,
            SchemaType::Set(element) => Type::Set(Box::new(Type::from(element.as_ref()))),
            SchemaType::Record(record) => Type::record(record),
            SchemaType::Entity(ty) => Type::entity(ty.clone()),
            SchemaType::Extension(kind) => Type::Extension(*kind),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Type::Never => write!(f, "Never"),
            Type::Any => write!(f, "Any"),
            Type::Bool => write!(f, "Bool"),
            Type::Long => write!(f, "Long"),
            Type::String => write!(f, "String"),
            Type::Set(element) => write!(f, "Set<{element}>"),
            Type::Record { attrs, .. } => write!(
                f,
                "{{{}}}",
                attrs
                    .iter()
                    .map(|(name, attr)| {
                        let marker = if attr.required { "" } else { "?" };
                        format!("{name}{marker}: {}", attr.ty)
                    })
                    .join(", ")
            ),
            Type::Entity(types) => write!(f, "Entity<{}>", types.iter().join(" | ")),
            Type::Extension(kind) => write!(f, "{kind}"),
        }
    }
}

/// The types of the four request variables for one (principal type,
/// action, resource type) combination.
#[derive(Debug, Clone)]
pub(crate) struct RequestEnv {
    pub principal: EntityType,
    pub action: EntityUid,
    pub resource: EntityType,
    pub context: Type,
}

impl Display for RequestEnv {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} / {} / {}",
            self.principal, self.action, self.resource
        )
    }
}

/// Facts established by `has` tests: `(receiver, attribute)` pairs known to
/// be present when an expression evaluates to true.
pub(crate) type Capabilities = HashSet<(Expr, String)>;

pub(crate) struct TypeChecker<'a> {
    schema: &'a Schema,
    env: &'a RequestEnv,
    errors: Vec<ValidationErrorKind>,
}

impl<'a> TypeChecker<'a> {
    pub(crate) fn new(schema: &'a Schema, env: &'a RequestEnv) -> Self {
        Self {
            schema,
            env,
            errors: Vec::new(),
        }
    }

    pub(crate) fn into_errors(self) -> Vec<ValidationErrorKind> {
        self.errors
    }

    fn error(&mut self, kind: ValidationErrorKind) {
        if !self.errors.contains(&kind) {
            self.errors.push(kind);
        }
    }

    fn expect(&mut self, actual: &Type, expected: &str, ok: impl Fn(&Type) -> bool) {
        if !matches!(actual, Type::Any) && !ok(actual) {
            self.error(ValidationErrorKind::UnexpectedType {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    fn expect_bool(&mut self, actual: &Type) {
        self.expect(actual, "Bool", |t| matches!(t, Type::Bool));
    }

    fn expect_long(&mut self, actual: &Type) {
        self.expect(actual, "Long", |t| matches!(t, Type::Long));
    }

    fn expect_set(&mut self, actual: &Type) {
        self.expect(actual, "Set", |t| matches!(t, Type::Set(_)));
    }

    fn require_entity_type(&mut self, ty: &EntityType) {
        if !self.schema.is_known_entity_type(ty) {
            self.error(ValidationErrorKind::UnrecognizedEntityType {
                name: ty.to_string(),
            });
        }
    }

    fn entity_literal(&mut self, uid: &EntityUid) -> Type {
        if uid.is_action() {
            if self.schema.action(uid).is_none() {
                self.error(ValidationErrorKind::UnrecognizedActionId {
                    uid: uid.to_string(),
                });
            }
        } else {
            self.require_entity_type(uid.entity_type());
        }
        Type::entity(uid.entity_type().clone())
    }

    fn value(&mut self, value: &Value) -> Type {
        match value {
            Value::Bool(_) => Type::Bool,
            Value::Long(_) => Type::Long,
            Value::String(_) => Type::String,
            Value::EntityUid(uid) => self.entity_literal(uid),
            Value::Set(values) => {
                let types: Vec<Type> = values.iter().map(|v| self.value(v)).collect();
                Type::Set(Box::new(self.lub_all(types)))
            }
            Value::Record(attrs) => Type::Record {
                attrs: attrs
                    .iter()
                    .map(|(name, v)| {
                        (
                            name.clone(),
                            AttrType {
                                ty: self.value(v),
                                required: true,
                            },
                        )
                    })
                    .collect(),
                open: false,
            },
            Value::Extension(ext) => Type::Extension(ext.kind()),
        }
    }

    fn lub_all(&mut self, types: Vec<Type>) -> Type {
        let mut acc = Type::Never;
        for ty in types {
            match acc.lub(&ty) {
                Some(joined) => acc = joined,
                None => {
                    self.error(ValidationErrorKind::IncompatibleTypes {
                        left: acc.to_string(),
                        right: ty.to_string(),
                    });
                    return Type::Any;
                }
            }
        }
        acc
    }

    /// Type of one policy condition; the returned capabilities hold when
    /// the condition is true.
    pub(crate) fn condition(&mut self, body: &Expr, caps: &Capabilities) -> Capabilities {
        let (ty, established) = self.check(body, caps);
        self.expect_bool(&ty);
        established
    }

    fn check(&mut self, expr: &Expr, caps: &Capabilities) -> (Type, Capabilities) {
        let none = Capabilities::new;
        match expr {
            Expr::Value(value) => (self.value(value), none()),
            Expr::Var(var) => (self.var(*var), none()),
            Expr::Not(inner) => {
                let (ty, _) = self.check(inner, caps);
                self.expect_bool(&ty);
                (Type::Bool, none())
            }
            Expr::Neg(inner) => {
                let (ty, _) = self.check(inner, caps);
                self.expect_long(&ty);
                (Type::Long, none())
            }
            Expr::IsEmpty(inner) => {
                let (ty, _) = self.check(inner, caps);
                self.expect_set(&ty);
                (Type::Bool, none())
            }
            Expr::And(left, right) => {
                let (lt, mut lc) = self.check(left, caps);
                self.expect_bool(&lt);
                let inner: Capabilities = caps.union(&lc).cloned().collect();
                let (rt, rc) = self.check(right, &inner);
                self.expect_bool(&rt);
                lc.extend(rc);
                (Type::Bool, lc)
            }
            Expr::Or(left, right) => {
                let (lt, lc) = self.check(left, caps);
                self.expect_bool(&lt);
                let (rt, rc) = self.check(right, caps);
                self.expect_bool(&rt);
                (Type::Bool, lc.intersection(&rc).cloned().collect())
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let (ct, cc) = self.check(cond, caps);
                self.expect_bool(&ct);
                let inner: Capabilities = caps.union(&cc).cloned().collect();
                let (tt, tc) = self.check(then, &inner);
                let (et, ec) = self.check(otherwise, caps);
                let ty = self.lub_all(vec![tt, et]);
                let then_caps: Capabilities = cc.union(&tc).cloned().collect();
                (ty, then_caps.intersection(&ec).cloned().collect())
            }
            Expr::Binary { op, left, right } => (self.binary(*op, left, right, caps), none()),
            Expr::GetAttr { expr: receiver, attr } => {
                let (ty, _) = self.check(receiver, caps);
                let attr_type = self.attribute(&ty, attr);
                if let Some(AttrType { ty, required }) = attr_type {
                    if !required && !caps.contains(&(receiver.as_ref().clone(), attr.clone())) {
                        self.error(ValidationErrorKind::UnsafeOptionalAttributeAccess {
                            on: receiver.to_string(),
                            attr: attr.clone(),
                        });
                    }
                    (ty, none())
                } else {
                    (Type::Any, none())
                }
            }
            Expr::HasAttr { expr: receiver, attr } => {
                let (ty, _) = self.check(receiver, caps);
                self.expect(&ty, "entity or record", |t| {
                    matches!(t, Type::Entity(_) | Type::Record { .. })
                });
                let mut established = none();
                established.insert((receiver.as_ref().clone(), attr.clone()));
                (Type::Bool, established)
            }
            Expr::Like { expr: inner, .. } => {
                let (ty, _) = self.check(inner, caps);
                self.expect(&ty, "String", |t| matches!(t, Type::String));
                (Type::Bool, none())
            }
            Expr::Is {
                expr: inner,
                entity_type,
                in_expr,
            } => {
                let (ty, _) = self.check(inner, caps);
                self.expect(&ty, "entity", |t| matches!(t, Type::Entity(_)));
                self.require_entity_type(entity_type);
                if let Some(in_expr) = in_expr {
                    let (rt, _) = self.check(in_expr, caps);
                    self.expect_in_target(&rt);
                }
                (Type::Bool, none())
            }
            Expr::Set(items) => {
                let types: Vec<Type> = items.iter().map(|e| self.check(e, caps).0).collect();
                (Type::Set(Box::new(self.lub_all(types))), none())
            }
            Expr::Record(attrs) => {
                let attrs = attrs
                    .iter()
                    .map(|(name, e)| {
                        (
                            name.clone(),
                            AttrType {
                                ty: self.check(e, caps).0,
                                required: true,
                            },
                        )
                    })
                    .collect();
                (Type::Record { attrs, open: false }, none())
            }
            Expr::Call { name, args } => (self.call(name, args, caps), none()),
        }
    }

    fn var(&self, var: Var) -> Type {
        match var {
            Var::Principal => Type::entity(self.env.principal.clone()),
            Var::Action => Type::entity(self.env.action.entity_type().clone()),
            Var::Resource => Type::entity(self.env.resource.clone()),
            Var::Context => self.env.context.clone(),
        }
    }

    fn expect_in_target(&mut self, ty: &Type) {
        self.expect(ty, "entity or set of entities", |t| match t {
            Type::Entity(_) => true,
            Type::Set(element) => element.is_entity_like(),
            _ => false,
        });
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, caps: &Capabilities) -> Type {
        let (lt, _) = self.check(left, caps);
        let (rt, _) = self.check(right, caps);
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                if lt.lub(&rt).is_none() {
                    self.error(ValidationErrorKind::IncompatibleTypes {
                        left: lt.to_string(),
                        right: rt.to_string(),
                    });
                }
                Type::Bool
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                self.expect_long(&lt);
                self.expect_long(&rt);
                Type::Bool
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                self.expect_long(&lt);
                self.expect_long(&rt);
                Type::Long
            }
            BinaryOp::In => {
                self.expect(&lt, "entity", |t| matches!(t, Type::Entity(_)));
                self.expect_in_target(&rt);
                Type::Bool
            }
            BinaryOp::Contains => {
                self.expect_set(&lt);
                if let Type::Set(element) = &lt {
                    if element.lub(&rt).is_none() {
                        self.error(ValidationErrorKind::IncompatibleTypes {
                            left: element.to_string(),
                            right: rt.to_string(),
                        });
                    }
                }
                Type::Bool
            }
            BinaryOp::ContainsAll | BinaryOp::ContainsAny => {
                self.expect_set(&lt);
                self.expect_set(&rt);
                Type::Bool
            }
        }
    }

    /// Look `attr` up on an entity or record type. Reports undeclared
    /// attributes and returns `None` for them.
    fn attribute(&mut self, receiver: &Type, attr: &str) -> Option<AttrType> {
        match receiver {
            Type::Any => Some(AttrType {
                ty: Type::Any,
                required: true,
            }),
            Type::Record { attrs, open } => match attrs.get(attr) {
                Some(found) => Some(found.clone()),
                None if *open => Some(AttrType {
                    ty: Type::Any,
                    required: true,
                }),
                None => {
                    self.error(ValidationErrorKind::UnsafeAttributeAccess {
                        on: receiver.to_string(),
                        attr: attr.to_string(),
                    });
                    None
                }
            },
            Type::Entity(types) => {
                let mut found: Vec<AttrType> = Vec::new();
                for ty in types {
                    let shape = self
                        .schema
                        .entity_type(ty)
                        .map(|declared| Type::record(&declared.shape))
                        .unwrap_or(Type::Record {
                            attrs: BTreeMap::new(),
                            open: false,
                        });
                    found.push(self.attribute(&shape, attr)?);
                }
                let required = found.iter().all(|a| a.required);
                let ty = self.lub_all(found.into_iter().map(|a| a.ty).collect());
                Some(AttrType { ty, required })
            }
            other => {
                self.error(ValidationErrorKind::UnexpectedType {
                    expected: "entity or record".to_string(),
                    actual: other.to_string(),
                });
                None
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], caps: &Capabilities) -> Type {
        let Ok(function) = ExtensionFunction::from_str(name) else {
            self.error(ValidationErrorKind::UndefinedFunction {
                name: name.to_string(),
            });
            for arg in args {
                self.check(arg, caps);
            }
            return Type::Any;
        };

        let signature = function.signature();
        let ret = match signature.ret {
            ReturnType::Bool => Type::Bool,
            ReturnType::Extension(kind) => Type::Extension(kind),
        };
        if args.len() != signature.params.len() {
            self.error(ValidationErrorKind::WrongNumberArguments {
                name: name.to_string(),
                expected: signature.params.len(),
                actual: args.len(),
            });
            for arg in args {
                self.check(arg, caps);
            }
            return ret;
        }

        if function.is_constructor() {
            match &args[0] {
                Expr::Value(Value::String(literal)) => {
                    if let Err(err) = function.call(vec![Value::String(literal.clone())]) {
                        self.error(ValidationErrorKind::ExtensionLiteral {
                            message: err.to_string(),
                        });
                    }
                }
                other => {
                    let (ty, _) = self.check(other, caps);
                    self.expect(&ty, "String", |t| matches!(t, Type::String));
                    self.error(ValidationErrorKind::NonLiteralExtensionConstructor {
                        name: name.to_string(),
                    });
                }
            }
            return ret;
        }

        let mut comparable: Option<ExtensionKind> = None;
        for (arg, param) in args.iter().zip(signature.params) {
            let (ty, _) = self.check(arg, caps);
            match param {
                ParamType::String => self.expect(&ty, "String", |t| matches!(t, Type::String)),
                ParamType::Extension(kind) => {
                    self.expect(&ty, &kind.to_string(), |t| t == &Type::Extension(*kind))
                }
                ParamType::Comparable => match (&ty, comparable) {
                    (Type::Extension(kind @ (ExtensionKind::Decimal | ExtensionKind::U256)), None) => {
                        comparable = Some(*kind);
                    }
                    (Type::Extension(kind), Some(first)) if *kind == first => {}
                    (_, Some(first)) => {
                        self.expect(&ty, &first.to_string(), |t| t == &Type::Extension(first))
                    }
                    (_, None) => self.expect(&ty, "decimal or u256", |_| false),
                },
            }
        }
        ret
    }
}
