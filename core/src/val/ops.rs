use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuits in the engine; never reaches [`binary`].
    And,
    /// Short-circuits in the engine; never reaches [`binary`].
    Or,
}

impl BinaryOp {
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Not => f.write_str("!"),
        }
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> Result<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| anyhow!("integer overflow negating {}", i)),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, other) => Err(anyhow!("cannot negate {}", other.type_name())),
    }
}

/// Applies a strict binary operator to two primitives. References compare by identity.
pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => add(l, r),
        BinaryOp::Sub => arith(op, l, r, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arith(op, l, r, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => div(l, r),
        BinaryOp::Rem => rem(l, r),
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Lt => compare(op, l, r).map(|o| Value::Bool(o == Ordering::Less)),
        BinaryOp::Le => compare(op, l, r).map(|o| Value::Bool(o != Ordering::Greater)),
        BinaryOp::Gt => compare(op, l, r).map(|o| Value::Bool(o == Ordering::Greater)),
        BinaryOp::Ge => compare(op, l, r).map(|o| Value::Bool(o != Ordering::Less)),
        BinaryOp::And | BinaryOp::Or => bail!("operator '{}' must be evaluated lazily", op),
    }
}

fn add(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Str(a), b) => Ok(Value::Str(Arc::from(format!("{a}{b}")))),
        (a, Value::Str(b)) => Ok(Value::Str(Arc::from(format!("{a}{b}")))),
        _ => arith(BinaryOp::Add, l, r, i64::checked_add, |a, b| a + b),
    }
}

fn arith(
    op: BinaryOp,
    l: &Value,
    r: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| anyhow!("integer overflow in {} {} {}", a, op, b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        _ => Err(anyhow!(
            "unsupported operand types for {}: {} and {}",
            op,
            l.type_name(),
            r.type_name()
        )),
    }
}

fn div(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Int(_), Value::Int(0)) => Err(anyhow!("division by zero")),
        (Value::Int(a), Value::Int(b)) if a.checked_rem(*b) == Some(0) => Ok(Value::Int(a / b)),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Float(*a as f64 / *b as f64)),
        _ => arith(BinaryOp::Div, l, r, |_, _| None, |a, b| a / b),
    }
}

fn rem(l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Int(_), Value::Int(0)) => Err(anyhow!("modulo by zero")),
        _ => arith(BinaryOp::Rem, l, r, i64::checked_rem, |a, b| a % b),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Ordering> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => {
            bail!(
                "cannot compare {} {} {}",
                l.type_name(),
                op,
                r.type_name()
            )
        }
    };
    ordering.ok_or_else(|| anyhow!("comparison with NaN in {} {} {}", l, op, r))
}
