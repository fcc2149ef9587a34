//! The expression interpreter.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::ast::{BinaryOp, Condition, ConditionKind, Expr, Var};
use crate::entities::EntityStore;
use crate::error::EvalError;
use crate::extensions::ExtensionFunction;
use crate::types::{EntityUid, Request, Value};

/// Evaluates expressions against one request and one entity store.
pub struct Evaluator<'a> {
    request: &'a Request,
    entities: &'a EntityStore,
    context: Value,
}

impl<'a> Evaluator<'a> {
    pub fn new(request: &'a Request, entities: &'a EntityStore) -> Self {
        Self {
            request,
            entities,
            context: request.context.to_value(),
        }
    }

    /// Whether every condition holds: `when` bodies must be true and
    /// `unless` bodies false. Stops at the first condition that fails.
    pub fn conditions_hold(&self, conditions: &[Condition]) -> Result<bool, EvalError> {
        for condition in conditions {
            let value = self.eval_bool(&condition.body)?;
            let holds = match condition.kind {
                ConditionKind::When => value,
                ConditionKind::Unless => !value,
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn eval_bool(&self, expr: &Expr) -> Result<bool, EvalError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::type_error("bool", other.type_name())),
        }
    }

    fn eval_long(&self, expr: &Expr) -> Result<i64, EvalError> {
        match self.eval(expr)? {
            Value::Long(n) => Ok(n),
            other => Err(EvalError::type_error("long", other.type_name())),
        }
    }

    fn eval_set(&self, expr: &Expr) -> Result<BTreeSet<Value>, EvalError> {
        match self.eval(expr)? {
            Value::Set(values) => Ok(values),
            other => Err(EvalError::type_error("set", other.type_name())),
        }
    }

    fn eval_entity(&self, expr: &Expr) -> Result<EntityUid, EvalError> {
        match self.eval(expr)? {
            Value::EntityUid(uid) => Ok(uid),
            other => Err(EvalError::type_error("entity", other.type_name())),
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Value(value) => Ok(value.clone()),
            Expr::Var(var) => Ok(self.var(*var)),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval_bool(inner)?)),
            Expr::Neg(inner) => self
                .eval_long(inner)?
                .checked_neg()
                .map(Value::Long)
                .ok_or_else(|| EvalError::IntegerOverflow { op: "-".to_string() }),
            Expr::IsEmpty(inner) => Ok(Value::Bool(self.eval_set(inner)?.is_empty())),
            Expr::And(left, right) => {
                Ok(Value::Bool(self.eval_bool(left)? && self.eval_bool(right)?))
            }
            Expr::Or(left, right) => {
                Ok(Value::Bool(self.eval_bool(left)? || self.eval_bool(right)?))
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::GetAttr { expr, attr } => self.get_attr(expr, attr),
            Expr::HasAttr { expr, attr } => self.has_attr(expr, attr),
            Expr::Like { expr, pattern } => match self.eval(expr)? {
                Value::String(s) => Ok(Value::Bool(pattern.wildcard_match(&s))),
                other => Err(EvalError::type_error("string", other.type_name())),
            },
            Expr::Is {
                expr,
                entity_type,
                in_expr,
            } => {
                let uid = self.eval_entity(expr)?;
                if uid.entity_type() != entity_type {
                    return Ok(Value::Bool(false));
                }
                match in_expr {
                    Some(target) => {
                        let target = self.eval(target)?;
                        self.is_in(&uid, target).map(Value::Bool)
                    }
                    None => Ok(Value::Bool(true)),
                }
            }
            Expr::Set(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Value::Set),
            Expr::Record(attrs) => attrs
                .iter()
                .map(|(k, e)| Ok((k.clone(), self.eval(e)?)))
                .collect::<Result<_, EvalError>>()
                .map(Value::Record),
            Expr::Call { name, args } => {
                let function = ExtensionFunction::from_str(name)
                    .map_err(|_| EvalError::UnknownFunction { name: name.clone() })?;
                let args = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                function.call(args)
            }
        }
    }

    fn var(&self, var: Var) -> Value {
        match var {
            Var::Principal => Value::EntityUid(self.request.principal.clone()),
            Var::Action => Value::EntityUid(self.request.action.clone()),
            Var::Resource => Value::EntityUid(self.request.resource.clone()),
            Var::Context => self.context.clone(),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        let overflow = || EvalError::IntegerOverflow { op: op.to_string() };
        match op {
            BinaryOp::Eq => Ok(Value::Bool(self.eval(left)? == self.eval(right)?)),
            BinaryOp::NotEq => Ok(Value::Bool(self.eval(left)? != self.eval(right)?)),
            BinaryOp::Less => Ok(Value::Bool(self.eval_long(left)? < self.eval_long(right)?)),
            BinaryOp::LessEq => Ok(Value::Bool(self.eval_long(left)? <= self.eval_long(right)?)),
            BinaryOp::Greater => Ok(Value::Bool(self.eval_long(left)? > self.eval_long(right)?)),
            BinaryOp::GreaterEq => {
                Ok(Value::Bool(self.eval_long(left)? >= self.eval_long(right)?))
            }
            BinaryOp::Add => self
                .eval_long(left)?
                .checked_add(self.eval_long(right)?)
                .map(Value::Long)
                .ok_or_else(overflow),
            BinaryOp::Sub => self
                .eval_long(left)?
                .checked_sub(self.eval_long(right)?)
                .map(Value::Long)
                .ok_or_else(overflow),
            BinaryOp::Mul => self
                .eval_long(left)?
                .checked_mul(self.eval_long(right)?)
                .map(Value::Long)
                .ok_or_else(overflow),
            BinaryOp::In => {
                let uid = self.eval_entity(left)?;
                let target = self.eval(right)?;
                self.is_in(&uid, target).map(Value::Bool)
            }
            BinaryOp::Contains => {
                let set = self.eval_set(left)?;
                Ok(Value::Bool(set.contains(&self.eval(right)?)))
            }
            BinaryOp::ContainsAll => {
                let set = self.eval_set(left)?;
                let other = self.eval_set(right)?;
                Ok(Value::Bool(other.is_subset(&set)))
            }
            BinaryOp::ContainsAny => {
                let set = self.eval_set(left)?;
                let other = self.eval_set(right)?;
                Ok(Value::Bool(!set.is_disjoint(&other)))
            }
        }
    }

    /// `uid in target`, where `target` is an entity or a set of entities.
    fn is_in(&self, uid: &EntityUid, target: Value) -> Result<bool, EvalError> {
        match target {
            Value::EntityUid(ancestor) => Ok(self.entities.is_descendant_of(uid, &ancestor)),
            Value::Set(values) => {
                for value in values {
                    match value {
                        Value::EntityUid(ancestor) => {
                            if self.entities.is_descendant_of(uid, &ancestor) {
                                return Ok(true);
                            }
                        }
                        other => return Err(EvalError::type_error("entity", other.type_name())),
                    }
                }
                Ok(false)
            }
            other => Err(EvalError::type_error(
                "entity or set of entities",
                other.type_name(),
            )),
        }
    }

    fn get_attr(&self, expr: &Expr, attr: &str) -> Result<Value, EvalError> {
        match self.eval(expr)? {
            Value::EntityUid(uid) => {
                let entity = self
                    .entities
                    .get(&uid)
                    .ok_or_else(|| EvalError::EntityDoesNotExist { uid: uid.clone() })?;
                entity
                    .attr(attr)
                    .cloned()
                    .ok_or_else(|| EvalError::AttributeNotFound {
                        on: uid.to_string(),
                        attr: attr.to_string(),
                    })
            }
            Value::Record(mut attrs) => {
                attrs
                    .remove(attr)
                    .ok_or_else(|| EvalError::AttributeNotFound {
                        on: "record".to_string(),
                        attr: attr.to_string(),
                    })
            }
            other => Err(EvalError::type_error("entity or record", other.type_name())),
        }
    }

    fn has_attr(&self, expr: &Expr, attr: &str) -> Result<Value, EvalError> {
        match self.eval(expr)? {
            Value::EntityUid(uid) => Ok(Value::Bool(
                self.entities
                    .get(&uid)
                    .is_some_and(|entity| entity.attr(attr).is_some()),
            )),
            Value::Record(attrs) => Ok(Value::Bool(attrs.contains_key(attr))),
            other => Err(EvalError::type_error("entity or record", other.type_name())),
        }
    }
}
