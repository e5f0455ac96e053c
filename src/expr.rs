//! The expression sub-language (`§4.C`): a quoted symbolic form over bound
//! path variables and their properties, e.g. `(>= (score b) 0.6)`.
//!
//! Two layers exist here, matching the planner's lowering step:
//!
//! - [`Expr`] is the surface form a caller builds a `where`/`select` clause
//!   from. Its `PvarProp` variant names a path variable by symbol.
//! - [`LExpr`] is the lowered form that ends up inside a plan's `select`
//!   and `expression` operators. Its `PropRef` variant names the *operator
//!   id* of the `property` op that pre-loads the value, per `§4.E` step 4.
//!   The planner ([`crate::planner`]) performs the `Expr` → `LExpr` lowering.
//!
//! Evaluation never uses a host-language `eval` (`§9`): [`eval`] is a
//! dedicated interpreter over the fixed operator table below, the complete
//! set per `§4.C`.

use serde::{Deserialize, Serialize};

use crate::error::{PlasmaError, Result};
use crate::model::{PropValue, Scalar};
use crate::plan::OpId;
use crate::pt::{PathTuple, PtSlot};

/// Surface expression form, as written by a query author.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal value.
    Lit(PropValue),
    /// A reference to a property of a bound path variable, e.g. `(score b)`.
    PvarProp {
        /// Path-variable symbol, e.g. `"b"`.
        var: String,
        /// Property name on that variable's bound node.
        prop: String,
    },
    /// Any unary/binary/ternary operator over nested expressions.
    Call {
        /// One of the fixed operator symbols (see [`is_known_op`]).
        op: String,
        /// Operand expressions.
        args: Vec<Expr>,
    },
}

/// Lowered expression form, referencing plan operator ids instead of path
/// variable symbols.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LExpr {
    /// A literal value.
    Lit(PropValue),
    /// A reference to a property pre-loaded by the `property` op `op`.
    PropRef {
        /// The `property` operator that loaded this value.
        op: OpId,
        /// Property name within that operator's loaded set.
        prop: String,
    },
    /// A reference to the value bound by an upstream `expression` op.
    ValueRef(OpId),
    /// A call to one of the fixed operator symbols.
    Call {
        /// Operator symbol.
        op: String,
        /// Operand expressions.
        args: Vec<LExpr>,
    },
}

/// Operator symbols recognized by the interpreter (`§4.C`, "the complete
/// set").
pub const ARITHMETIC_OPS: &[&str] = &["+", "-", "*", "/", "mod", "pow", "abs"];
/// Comparison operator symbols.
pub const COMPARISON_OPS: &[&str] = &["=", "==", "not=", "<", ">", "<=", ">="];
/// Logical operator symbols.
pub const LOGICAL_OPS: &[&str] = &["and", "or", "not"];
/// Bitwise operator symbols.
pub const BITWISE_OPS: &[&str] = &["bit-and", "bit-or", "bit-xor", "bit-not", "shl", "shr"];
/// Trigonometric operator symbols.
pub const TRIG_OPS: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh",
];

/// True if `op` is one of the fixed operator symbols `§4.C` enumerates.
pub fn is_known_op(op: &str) -> bool {
    ARITHMETIC_OPS.contains(&op)
        || COMPARISON_OPS.contains(&op)
        || LOGICAL_OPS.contains(&op)
        || BITWISE_OPS.contains(&op)
        || TRIG_OPS.contains(&op)
}

/// Evaluates a lowered expression against a path tuple, substituting
/// `PropRef`/`ValueRef` symbols with their current bindings.
pub fn eval(expr: &LExpr, pt: &PathTuple) -> Result<PropValue> {
    match expr {
        LExpr::Lit(v) => Ok(v.clone()),
        LExpr::PropRef { op, prop } => {
            let props = pt
                .get(op)
                .and_then(PtSlot::as_props)
                .ok_or_else(|| {
                    PlasmaError::TypeMismatch {
                        op: "pvar-property".into(),
                        detail: format!("no properties loaded at operator {op}"),
                    }
                })?;
            props.get(prop).cloned().ok_or_else(|| PlasmaError::TypeMismatch {
                op: "pvar-property".into(),
                detail: format!("property `{prop}` not loaded"),
            })
        }
        LExpr::ValueRef(op) => match pt.get(op) {
            Some(PtSlot::Value(v)) => Ok(v.clone()),
            _ => Err(PlasmaError::TypeMismatch {
                op: "value-ref".into(),
                detail: format!("no value bound at operator {op}"),
            }),
        },
        LExpr::Call { op, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, pt))
                .collect::<Result<Vec<_>>>()?;
            eval_call(op, &values)
        }
    }
}

fn scalar_of(op: &str, v: &PropValue) -> Result<Scalar> {
    v.as_scalar().cloned().ok_or_else(|| PlasmaError::TypeMismatch {
        op: op.into(),
        detail: "expected a scalar operand".into(),
    })
}

fn num(op: &str, v: &PropValue) -> Result<f64> {
    scalar_of(op, v)?.as_f64().ok_or_else(|| PlasmaError::TypeMismatch {
        op: op.into(),
        detail: "expected a numeric operand".into(),
    })
}

fn int(op: &str, v: &PropValue) -> Result<i64> {
    match scalar_of(op, v)? {
        Scalar::Int(i) => Ok(i),
        Scalar::Bool(b) => Ok(b as i64),
        other => Err(PlasmaError::TypeMismatch {
            op: op.into(),
            detail: format!("expected an integer operand, got {other:?}"),
        }),
    }
}

fn boolean(op: &str, v: &PropValue) -> Result<bool> {
    match scalar_of(op, v)? {
        Scalar::Bool(b) => Ok(b),
        other => Err(PlasmaError::TypeMismatch {
            op: op.into(),
            detail: format!("expected a boolean operand, got {other:?}"),
        }),
    }
}

/// Dispatches a single call to its operator family. Exposed at `pub(crate)`
/// visibility so [`crate::iter_query`]'s per-node predicate evaluator (which
/// has no [`PathTuple`] to hand `eval` — only a single graph node) can reuse
/// the same fixed operator table instead of duplicating it.
pub(crate) fn eval_call(op: &str, args: &[PropValue]) -> Result<PropValue> {
    if ARITHMETIC_OPS.contains(&op) {
        return eval_arithmetic(op, args);
    }
    if COMPARISON_OPS.contains(&op) {
        return eval_comparison(op, args);
    }
    if LOGICAL_OPS.contains(&op) {
        return eval_logical(op, args);
    }
    if BITWISE_OPS.contains(&op) {
        return eval_bitwise(op, args);
    }
    if TRIG_OPS.contains(&op) {
        return eval_trig(op, args);
    }
    Err(PlasmaError::TypeMismatch {
        op: op.into(),
        detail: "unknown operator symbol".into(),
    })
}

fn eval_arithmetic(op: &str, args: &[PropValue]) -> Result<PropValue> {
    if op == "abs" {
        let a = num(op, arg(op, args, 0)?)?;
        return Ok(PropValue::from(a.abs()));
    }
    let a = num(op, arg(op, args, 0)?)?;
    let b = num(op, arg(op, args, 1)?)?;
    let result = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "mod" => a % b,
        "pow" => a.powf(b),
        _ => unreachable!("checked by is_known_op dispatch"),
    };
    Ok(PropValue::from(result))
}

fn eval_comparison(op: &str, args: &[PropValue]) -> Result<PropValue> {
    let a = scalar_of(op, arg(op, args, 0)?)?;
    let b = scalar_of(op, arg(op, args, 1)?)?;
    let ordering = a.as_f64().zip(b.as_f64());
    let result = match op {
        "=" | "==" => a == b,
        "not=" => a != b,
        "<" => ordering.map(|(x, y)| x < y).ok_or_else(non_numeric(op))?,
        ">" => ordering.map(|(x, y)| x > y).ok_or_else(non_numeric(op))?,
        "<=" => ordering.map(|(x, y)| x <= y).ok_or_else(non_numeric(op))?,
        ">=" => ordering.map(|(x, y)| x >= y).ok_or_else(non_numeric(op))?,
        _ => unreachable!("checked by is_known_op dispatch"),
    };
    Ok(PropValue::from(result))
}

fn non_numeric(op: &str) -> impl FnOnce() -> PlasmaError {
    let op = op.to_string();
    move || PlasmaError::TypeMismatch {
        op,
        detail: "ordering comparison requires numeric operands".into(),
    }
}

fn eval_logical(op: &str, args: &[PropValue]) -> Result<PropValue> {
    match op {
        "not" => {
            let a = boolean(op, arg(op, args, 0)?)?;
            Ok(PropValue::from(!a))
        }
        "and" => {
            for a in args {
                if !boolean(op, a)? {
                    return Ok(PropValue::from(false));
                }
            }
            Ok(PropValue::from(true))
        }
        "or" => {
            for a in args {
                if boolean(op, a)? {
                    return Ok(PropValue::from(true));
                }
            }
            Ok(PropValue::from(false))
        }
        _ => unreachable!("checked by is_known_op dispatch"),
    }
}

fn eval_bitwise(op: &str, args: &[PropValue]) -> Result<PropValue> {
    if op == "bit-not" {
        let a = int(op, arg(op, args, 0)?)?;
        return Ok(PropValue::from(!a));
    }
    let a = int(op, arg(op, args, 0)?)?;
    let b = int(op, arg(op, args, 1)?)?;
    let result = match op {
        "bit-and" => a & b,
        "bit-or" => a | b,
        "bit-xor" => a ^ b,
        "shl" => a << b,
        "shr" => a >> b,
        _ => unreachable!("checked by is_known_op dispatch"),
    };
    Ok(PropValue::from(result))
}

fn eval_trig(op: &str, args: &[PropValue]) -> Result<PropValue> {
    let a = num(op, arg(op, args, 0)?)?;
    let result = match op {
        "sin" => a.sin(),
        "cos" => a.cos(),
        "tan" => a.tan(),
        "asin" => a.asin(),
        "acos" => a.acos(),
        "atan" => a.atan(),
        "sinh" => a.sinh(),
        "cosh" => a.cosh(),
        "tanh" => a.tanh(),
        _ => unreachable!("checked by is_known_op dispatch"),
    };
    Ok(PropValue::from(result))
}

fn arg<'a>(op: &str, args: &'a [PropValue], idx: usize) -> Result<&'a PropValue> {
    args.get(idx).ok_or_else(|| PlasmaError::TypeMismatch {
        op: op.into(),
        detail: format!("missing operand {idx}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: impl Into<PropValue>) -> LExpr {
        LExpr::Lit(v.into())
    }

    #[test]
    fn comparison_against_threshold() {
        let expr = LExpr::Call {
            op: ">=".into(),
            args: vec![lit(0.8_f64), lit(0.6_f64)],
        };
        let pt = PathTuple::empty();
        assert_eq!(eval(&expr, &pt).unwrap(), PropValue::from(true));
    }

    #[test]
    fn arithmetic_and_logical_compose() {
        let expr = LExpr::Call {
            op: "and".into(),
            args: vec![
                LExpr::Call {
                    op: ">".into(),
                    args: vec![
                        LExpr::Call {
                            op: "+".into(),
                            args: vec![lit(1_i64), lit(2_i64)],
                        },
                        lit(2_i64),
                    ],
                },
                lit(true),
            ],
        };
        let pt = PathTuple::empty();
        assert_eq!(eval(&expr, &pt).unwrap(), PropValue::from(true));
    }

    #[test]
    fn type_mismatch_is_reported_not_panicked() {
        let expr = LExpr::Call {
            op: "+".into(),
            args: vec![lit("oops"), lit(1_i64)],
        };
        let pt = PathTuple::empty();
        assert!(eval(&expr, &pt).is_err());
    }

    #[test]
    fn prop_ref_reads_loaded_properties() {
        use std::collections::BTreeMap;
        let op = OpId::from_raw("prop0");
        let mut props = BTreeMap::new();
        props.insert("score".to_string(), PropValue::from(0.8_f64));
        let pt = PathTuple::empty().extended(op.clone(), PtSlot::Props(props));
        let expr = LExpr::Call {
            op: ">=".into(),
            args: vec![
                LExpr::PropRef {
                    op,
                    prop: "score".into(),
                },
                lit(0.6_f64),
            ],
        };
        assert_eq!(eval(&expr, &pt).unwrap(), PropValue::from(true));
    }
}
