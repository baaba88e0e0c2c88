//! Cell-wise evaluation of band math expressions
//!
//! All arithmetic is done in `f64`. Operands are either scalars or one value
//! per cell of the tile being processed; scalars broadcast against cells.

use super::expr::{BinaryOp, Expr, Function, UnaryOp};
use hrwsi_core::Result;

/// Truth value of a number: anything but zero, NaN included
#[inline]
pub fn truthy(v: f64) -> bool {
    v != 0.0
}

#[inline]
fn from_bool(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Convert an evaluated value to an output byte.
///
/// NaN becomes 0, anything else is rounded half away from zero and clamped
/// to `0..=255`.
#[inline]
pub fn to_byte(v: f64) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}

pub fn apply_unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => from_bool(!truthy(x)),
    }
}

pub fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Or => from_bool(truthy(a) || truthy(b)),
        BinaryOp::And => from_bool(truthy(a) && truthy(b)),
        BinaryOp::Eq => from_bool(a == b),
        BinaryOp::Ne => from_bool(a != b),
        BinaryOp::Lt => from_bool(a < b),
        BinaryOp::Le => from_bool(a <= b),
        BinaryOp::Gt => from_bool(a > b),
        BinaryOp::Ge => from_bool(a >= b),
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                f64::NAN
            } else {
                a / b
            }
        }
        BinaryOp::Rem => floor_mod(a, b),
        BinaryOp::Pow => a.powf(b),
    }
}

/// Remainder with the sign of the divisor
fn floor_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Apply a function to already evaluated arguments.
///
/// Argument counts are checked by the parser.
pub fn apply_call(func: Function, args: &[f64]) -> f64 {
    let first = args.first().copied().unwrap_or(f64::NAN);
    match func {
        Function::Min => extremum(args, f64::min),
        Function::Max => extremum(args, f64::max),
        Function::Abs => first.abs(),
        Function::Floor => first.floor(),
        Function::Ceil => first.ceil(),
        Function::Round => first.round(),
        Function::Clip => match args {
            [x, lo, hi] if !x.is_nan() => x.max(*lo).min(*hi),
            _ => f64::NAN,
        },
        Function::Where => match args {
            [cond, a, b] => {
                if truthy(*cond) {
                    *a
                } else {
                    *b
                }
            }
            _ => f64::NAN,
        },
        Function::Any => from_bool(args.iter().any(|&v| truthy(v))),
        Function::All => from_bool(args.iter().all(|&v| truthy(v))),
        Function::Uint8 => {
            if first.is_finite() {
                (first.trunc() as i64).rem_euclid(256) as f64
            } else {
                0.0
            }
        }
    }
}

/// Min or max where any NaN argument makes the result NaN
fn extremum(args: &[f64], pick: fn(f64, f64) -> f64) -> f64 {
    if args.is_empty() || args.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    args.iter().copied().reduce(pick).unwrap_or(f64::NAN)
}

/// Result of evaluating a (sub-)expression over a tile
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    /// One value per cell, row-major
    Cells(Vec<f64>),
}

impl Value {
    /// Value of cell `i`
    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        match self {
            Value::Scalar(v) => *v,
            Value::Cells(cells) => cells[i],
        }
    }

    /// Expand to one value per cell
    pub fn into_cells(self, len: usize) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![v; len],
            Value::Cells(cells) => cells,
        }
    }

    fn map(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(v)),
            Value::Cells(mut cells) => {
                cells.iter_mut().for_each(|v| *v = f(*v));
                Value::Cells(cells)
            }
        }
    }

    fn zip_with(self, other: Value, f: impl Fn(f64, f64) -> f64) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
            (Value::Cells(mut a), Value::Scalar(b)) => {
                a.iter_mut().for_each(|x| *x = f(*x, b));
                Value::Cells(a)
            }
            (Value::Scalar(a), Value::Cells(mut b)) => {
                b.iter_mut().for_each(|x| *x = f(a, *x));
                Value::Cells(b)
            }
            (Value::Cells(mut a), Value::Cells(b)) => {
                a.iter_mut().zip(b).for_each(|(x, y)| *x = f(*x, y));
                Value::Cells(a)
            }
        }
    }
}

/// Values an expression reads while being evaluated over one tile
pub trait Operands {
    /// Number of cells in the tile
    fn cell_count(&self) -> usize;

    /// Source `index`, or one of its bits
    fn source(&self, index: usize, bit: Option<u8>) -> Result<Value>;

    /// Current output band, or one of its bits
    fn output(&self, bit: Option<u8>) -> Value;
}

/// Evaluate `expr` over every cell provided by `operands`
pub fn evaluate(expr: &Expr, operands: &dyn Operands) -> Result<Value> {
    Ok(match expr {
        Expr::Const(v) => Value::Scalar(*v),
        Expr::Source { index, bit } => operands.source(*index, *bit)?,
        Expr::Output { bit } => operands.output(*bit),
        Expr::Unary { op, operand } => {
            let op = *op;
            evaluate(operand, operands)?.map(|x| apply_unary(op, x))
        }
        Expr::Binary { op, left, right } => {
            let op = *op;
            let left = evaluate(left, operands)?;
            let right = evaluate(right, operands)?;
            left.zip_with(right, |a, b| apply_binary(op, a, b))
        }
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, operands))
                .collect::<Result<Vec<_>>>()?;
            call_cells(*func, &values, operands.cell_count())
        }
    })
}

fn call_cells(func: Function, values: &[Value], len: usize) -> Value {
    let mut buffer = Vec::with_capacity(values.len());

    if values.iter().all(|v| matches!(v, Value::Scalar(_))) {
        buffer.extend(values.iter().map(|v| v.get(0)));
        return Value::Scalar(apply_call(func, &buffer));
    }

    let cells = (0..len)
        .map(|i| {
            buffer.clear();
            buffer.extend(values.iter().map(|v| v.get(i)));
            apply_call(func, &buffer)
        })
        .collect();
    Value::Cells(cells)
}
