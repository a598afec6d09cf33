//! The built-in functions available to definitions.

use codespan::Span;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive};
use std::collections::HashMap;
use std::rc::Rc;

use crate::diagnostics::{ErrorKind, LangError};
use crate::eval;
use crate::parser::Expr;
use crate::value::{value_eq, LazyValue, Value};

type BuiltinFn = fn(&[Value], Span) -> Result<Value, LangError>;

lazy_static::lazy_static! {
    static ref BUILTINS: HashMap<&'static str, BuiltinFn> = maplit::hashmap! {
        "slice" => builtin_slice as BuiltinFn,
        "has" => builtin_has as BuiltinFn,
        "parseInt" => builtin_parse_int as BuiltinFn,
        "ceil" => builtin_ceil as BuiltinFn,
        "floor" => builtin_floor as BuiltinFn,
        "abs" => builtin_abs as BuiltinFn,
        "len" => builtin_len as BuiltinFn,
    };
}

/// Evaluate a call expression.
///
/// A call always produces a lazy so that its arguments are evaluated in the
/// namespace that is current when the value is finally needed, not the one
/// at document-load time.
pub(crate) fn evaluate_call(
    callee: &Expr,
    args: &[Expr],
    span: Span,
) -> Result<Value, LangError> {
    let name = match eval::evaluate(callee, None)? {
        Value::Ident(name) => name,
        other => {
            return Err(LangError::new(
                ErrorKind::Type,
                callee.span(),
                format!("object of type {} is not callable", other.kind()),
            ));
        }
    };

    let builtin = *BUILTINS.get(name.as_str()).ok_or_else(|| {
        LangError::new(
            ErrorKind::Access,
            callee.span(),
            format!("unknown function `{}`", name),
        )
    })?;

    let args: Rc<Vec<Expr>> = Rc::new(args.to_vec());
    Ok(Value::Lazy(LazyValue::new(move |ns| {
        let mut values = Vec::with_capacity(args.len());
        for arg in args.iter() {
            values.push(eval::force(eval::evaluate(arg, ns)?, ns)?);
        }
        builtin(&values, span)
    })))
}

fn check_arity(name: &str, args: &[Value], expected: usize, span: Span) -> Result<(), LangError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "{} requires {} argument(s), received {}",
                name,
                expected,
                args.len()
            ),
        ))
    }
}

fn int_arg(name: &str, what: &str, value: &Value, span: Span) -> Result<BigInt, LangError> {
    match value {
        Value::Int(int) => Ok(int.clone()),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "{} argument of {} must be an integer, not {}",
                what,
                name,
                other.kind()
            ),
        )),
    }
}

fn builtin_slice(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("slice", args, 3, span)?;

    let start = int_arg("slice", "start", &args[1], span)?;
    let end = int_arg("slice", "end", &args[2], span)?;

    let len = match &args[0] {
        Value::List(items) => items.len(),
        Value::String(bytes) => bytes.len(),
        other => {
            return Err(LangError::new(
                ErrorKind::Type,
                span,
                format!(
                    "first argument of slice must be a list or string, not {}",
                    other.kind()
                ),
            ));
        }
    };

    let out_of_bounds =
        || LangError::new(ErrorKind::Value, span, "start argument out of bounds");
    let start = start.to_usize().ok_or_else(out_of_bounds)?;
    if start >= len {
        return Err(out_of_bounds());
    }

    // the end is clamped to the target length
    let end = end.to_usize().unwrap_or(0).min(len).max(start);

    match &args[0] {
        Value::List(items) => Ok(Value::List(items[start..end].to_vec())),
        Value::String(bytes) => Ok(Value::String(bytes[start..end].to_vec())),
        _ => unreachable_kind(span),
    }
}

// the kind was checked above; reaching this is a runtime bug, not a panic
fn unreachable_kind(span: Span) -> Result<Value, LangError> {
    Err(LangError::new(
        ErrorKind::Runtime,
        span,
        "argument kind changed during evaluation",
    ))
}

fn builtin_has(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("has", args, 2, span)?;

    match &args[0] {
        Value::List(items) => Ok(Value::Bool(
            items.iter().any(|item| value_eq(item, &args[1])),
        )),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "first argument of has must be a list, not {}",
                other.kind()
            ),
        )),
    }
}

fn builtin_parse_int(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("parseInt", args, 1, span)?;

    match &args[0] {
        Value::String(bytes) => BigInt::parse_bytes(bytes, 10).map(Value::Int).ok_or_else(|| {
            LangError::new(
                ErrorKind::Value,
                span,
                format!(
                    "parseInt: invalid input {:?}",
                    String::from_utf8_lossy(bytes)
                ),
            )
        }),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!("parseInt argument must be a string, not {}", other.kind()),
        )),
    }
}

fn float_to_int(value: f64, name: &str, span: Span) -> Result<Value, LangError> {
    BigInt::from_f64(value).map(Value::Int).ok_or_else(|| {
        LangError::new(
            ErrorKind::Value,
            span,
            format!("{}: value is out of range", name),
        )
    })
}

fn builtin_ceil(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("ceil", args, 1, span)?;

    match &args[0] {
        Value::Int(int) => Ok(Value::Int(int.clone())),
        Value::Float(float) => float_to_int(float.ceil(), "ceil", span),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!("ceil argument must be numeric, not {}", other.kind()),
        )),
    }
}

fn builtin_floor(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("floor", args, 1, span)?;

    match &args[0] {
        Value::Int(int) => Ok(Value::Int(int.clone())),
        Value::Float(float) => float_to_int(float.floor(), "floor", span),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!("floor argument must be numeric, not {}", other.kind()),
        )),
    }
}

fn builtin_abs(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("abs", args, 1, span)?;

    match &args[0] {
        Value::Int(int) => Ok(Value::Int(int.abs())),
        Value::Float(float) => Ok(Value::Float(float.abs())),
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!("abs argument must be numeric, not {}", other.kind()),
        )),
    }
}

fn builtin_len(args: &[Value], span: Span) -> Result<Value, LangError> {
    check_arity("len", args, 1, span)?;

    let len = match &args[0] {
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::String(bytes) => bytes.len(),
        other => {
            return Err(LangError::new(
                ErrorKind::Type,
                span,
                format!("len: incompatible type {}", other.kind()),
            ));
        }
    };

    Ok(Value::int(len as u64))
}
