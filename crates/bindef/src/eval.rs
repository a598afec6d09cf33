//! Evaluation of expression trees into values.

use codespan::Span;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::rc::Rc;

use crate::diagnostics::{ErrorKind, LangError};
use crate::functions;
use crate::lexer::{Token, TokenKind};
use crate::parser::Expr;
use crate::value::{value_eq, LazyValue, Namespace, TypeName, TypeValue, Value, ValueMap};

/// Evaluate `expr` against an optional namespace.
///
/// Without a namespace, identifiers that are not reserved type names stay
/// unresolved [`Value::Ident`]s; with one, they are looked up there and a
/// missing name is an `AccessError`. This is how map and list literals defer
/// identifier resolution to whoever finally reads the entry.
pub fn evaluate(expr: &Expr, ns: Option<&Namespace>) -> Result<Value, LangError> {
    match expr {
        Expr::Literal(token) => evaluate_literal(token, ns),
        Expr::Unary { op, expr } => evaluate_unary(op, expr, ns),
        Expr::Binary { op, left, right } => evaluate_binary(op, left, right, ns),
        Expr::Map { entries, .. } => evaluate_map(entries, ns),
        Expr::List { items, .. } => evaluate_list(items, ns),
        Expr::Attr { target, name } => evaluate_attr(target, name, ns),
        Expr::Subscript {
            target,
            index,
            span,
        } => evaluate_subscript(target, index, *span, ns),
        Expr::Call { callee, args, span } => functions::evaluate_call(callee, args, *span),
    }
}

/// Apply lazy values until a concrete one appears.
///
/// Function calls evaluate to lazies of their own, so settling a value can
/// take more than one step.
pub fn force(mut value: Value, ns: Option<&Namespace>) -> Result<Value, LangError> {
    let mut steps = 0;
    while let Value::Lazy(lazy) = value {
        value = lazy.apply(ns)?;
        steps += 1;
        if steps > 64 {
            return Err(LangError::unpositioned(
                ErrorKind::Runtime,
                "lazy evaluation did not settle",
            ));
        }
    }
    Ok(value)
}

/// Wrap an expression subtree as a lazy closure over its future namespace.
pub fn lazy_expr(expr: &Expr) -> LazyValue {
    let expr = Rc::new(expr.clone());
    LazyValue::new(move |ns| evaluate(&expr, ns))
}

/// Whether evaluating `expr` requires a namespace that is not available at
/// literal construction time: any attribute access, any identifier that is
/// not a reserved type name, or any composite over such a subtree.
pub fn must_evaluate_lazily(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(token) => {
            token.kind == TokenKind::Identifier
                && TypeName::from_ident(token.text_str()).is_none()
        }
        Expr::Unary { expr, .. } => must_evaluate_lazily(expr),
        Expr::Binary { left, right, .. } => {
            must_evaluate_lazily(left) || must_evaluate_lazily(right)
        }
        // attribute access always reads the namespace
        Expr::Attr { .. } => true,
        Expr::Subscript { target, index, .. } => {
            must_evaluate_lazily(target) || must_evaluate_lazily(index)
        }
        // maps and lists are containers built eagerly; their entries carry
        // their own laziness
        Expr::Map { .. } | Expr::List { .. } => false,
        Expr::Call { callee, args, .. } => {
            must_evaluate_lazily(callee) || args.iter().any(must_evaluate_lazily)
        }
    }
}

fn is_identifier_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(token) if token.kind == TokenKind::Identifier)
}

fn evaluate_literal(token: &Token, ns: Option<&Namespace>) -> Result<Value, LangError> {
    match token.kind {
        TokenKind::Integer => parse_int_literal(token),
        TokenKind::Float => token.text_str().parse::<f64>().map(Value::Float).map_err(|err| {
            LangError::new(
                ErrorKind::Syntax,
                token.span,
                format!("invalid float literal: {}", err),
            )
        }),
        TokenKind::Identifier => {
            let name = token.text_str();
            if let Some(ty) = TypeName::from_ident(name) {
                return Ok(Value::Type(TypeValue {
                    name: ty,
                    params: Vec::new(),
                }));
            }

            match ns {
                Some(ns) => ns.get_ident(name).cloned().ok_or_else(|| {
                    LangError::new(
                        ErrorKind::Access,
                        token.span,
                        format!("`{}` is not defined", name),
                    )
                }),
                None => Ok(Value::ident(name)),
            }
        }
        TokenKind::Keyword => match token.text_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(LangError::new(
                ErrorKind::Syntax,
                token.span,
                format!("unknown keyword `{}`", other),
            )),
        },
        TokenKind::String => Ok(Value::String(token.text.clone())),
        kind => Err(LangError::new(
            ErrorKind::Runtime,
            token.span,
            format!("evaluation undefined for literal {}", kind),
        )),
    }
}

fn parse_int_literal(token: &Token) -> Result<Value, LangError> {
    let invalid =
        || LangError::new(ErrorKind::Syntax, token.span, "invalid integer literal");

    let (digits, radix) = match token.text.as_slice() {
        [b'0', b'x', rest @ ..] => (rest, 16),
        [b'0', b'o', rest @ ..] => (rest, 8),
        [b'0', b'b', rest @ ..] => (rest, 2),
        text => (text, 10),
    };

    if digits.is_empty() {
        return Err(invalid());
    }

    BigInt::parse_bytes(digits, radix)
        .map(Value::Int)
        .ok_or_else(invalid)
}

fn evaluate_unary(op: &Token, operand: &Expr, ns: Option<&Namespace>) -> Result<Value, LangError> {
    let span = Span::new(op.span.start(), operand.span().end());
    let value = force(evaluate(operand, ns)?, ns)?;

    let type_error = |value: &Value| {
        LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "{} does not support unary operation {}",
                value.kind(),
                op.text_str()
            ),
        )
    };

    match op.kind {
        TokenKind::Plus => match value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            other => Err(type_error(&other)),
        },
        TokenKind::Minus => match value {
            Value::Int(int) => Ok(Value::Int(-int)),
            Value::Float(float) => Ok(Value::Float(-float)),
            other => Err(type_error(&other)),
        },
        TokenKind::BitNot => match value {
            Value::Int(int) => Ok(Value::Int(-(int + BigInt::one()))),
            other => Err(type_error(&other)),
        },
        TokenKind::Not => match value.as_bool() {
            Some(coerced) => Ok(Value::Bool(!coerced)),
            None => Err(LangError::new(
                ErrorKind::Runtime,
                span,
                format!("{} cannot be converted to a boolean", value.kind()),
            )),
        },
        kind => Err(LangError::new(
            ErrorKind::Runtime,
            op.span,
            format!("undefined unary operation {}", kind),
        )),
    }
}

/// Convert a big integer to a float, saturating to infinity on overflow.
fn big_to_f64(value: &BigInt) -> f64 {
    value.to_f64().unwrap_or_else(|| {
        if value.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }
    })
}

fn evaluate_binary(
    op: &Token,
    left_expr: &Expr,
    right_expr: &Expr,
    ns: Option<&Namespace>,
) -> Result<Value, LangError> {
    let span = Span::new(left_expr.span().start(), right_expr.span().end());

    // logical operators short-circuit, so the right side is only evaluated
    // when it can still decide the result
    if matches!(op.kind, TokenKind::LogicalAnd | TokenKind::LogicalOr) {
        let left = force(evaluate(left_expr, ns)?, ns)?;
        let left_bool = left.as_bool().ok_or_else(|| {
            LangError::new(
                ErrorKind::Runtime,
                left_expr.span(),
                format!("left operand {} cannot be converted to a boolean", left.kind()),
            )
        })?;

        match op.kind {
            TokenKind::LogicalOr if left_bool => return Ok(Value::Bool(true)),
            TokenKind::LogicalAnd if !left_bool => return Ok(Value::Bool(false)),
            _ => {}
        }

        let right = force(evaluate(right_expr, ns)?, ns)?;
        let right_bool = right.as_bool().ok_or_else(|| {
            LangError::new(
                ErrorKind::Runtime,
                right_expr.span(),
                format!(
                    "right operand {} cannot be converted to a boolean",
                    right.kind()
                ),
            )
        })?;

        return Ok(Value::Bool(right_bool));
    }

    let left = force(evaluate(left_expr, ns)?, ns)?;
    let right = force(evaluate(right_expr, ns)?, ns)?;

    let type_error = || {
        LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "binary operation {} is not defined on types {} and {}",
                op.text_str(),
                left.kind(),
                right.kind()
            ),
        )
    };

    match op.kind {
        TokenKind::Plus => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(big_to_f64(a) + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + big_to_f64(b))),
            (Value::String(a), Value::String(b)) => {
                let mut joined = a.clone();
                joined.extend_from_slice(b);
                Ok(Value::String(joined))
            }
            _ => Err(type_error()),
        },
        TokenKind::Minus => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(big_to_f64(a) - b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - big_to_f64(b))),
            _ => Err(type_error()),
        },
        TokenKind::Mul => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(big_to_f64(a) * b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * big_to_f64(b))),
            _ => Err(type_error()),
        },
        TokenKind::Pow => match (&left, &right) {
            (Value::Int(base), Value::Int(exponent)) if !exponent.is_negative() => {
                let exponent = exponent.to_usize().ok_or_else(|| {
                    LangError::new(ErrorKind::Domain, span, "exponent is too large")
                })?;
                Ok(Value::Int(num_traits::pow(base.clone(), exponent)))
            }
            (Value::Int(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_))
            | (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_)) => {
                let base = match &left {
                    Value::Int(int) => big_to_f64(int),
                    Value::Float(float) => *float,
                    _ => return Err(type_error()),
                };
                let exponent = match &right {
                    Value::Int(int) => big_to_f64(int),
                    Value::Float(float) => *float,
                    _ => return Err(type_error()),
                };
                let result = base.powf(exponent);

                // an integral result of two integer operands stays an integer
                if matches!((&left, &right), (Value::Int(_), Value::Int(_)))
                    && result.trunc() == result
                {
                    if let Some(int) = BigInt::from_f64(result) {
                        return Ok(Value::Int(int));
                    }
                }
                Ok(Value::Float(result))
            }
            _ => Err(type_error()),
        },
        TokenKind::Div => {
            let divisor = match &right {
                Value::Int(int) => Some(big_to_f64(int)),
                Value::Float(float) => Some(*float),
                _ => None,
            };
            let dividend = match &left {
                Value::Int(int) => Some(big_to_f64(int)),
                Value::Float(float) => Some(*float),
                _ => None,
            };

            match (dividend, divisor) {
                (Some(_), Some(divisor)) if divisor == 0.0 => Err(LangError::new(
                    ErrorKind::Domain,
                    span,
                    "division by zero",
                )),
                (Some(dividend), Some(divisor)) => Ok(Value::Float(dividend / divisor)),
                _ => Err(type_error()),
            }
        }
        TokenKind::Modulo => match (&left, &right) {
            (Value::Int(_), Value::Int(b)) if b.is_zero() => Err(LangError::new(
                ErrorKind::Domain,
                span,
                "integer remainder by zero",
            )),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            (Value::Float(_), Value::Float(_))
            | (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_)) => {
                let dividend = match &left {
                    Value::Int(int) => big_to_f64(int),
                    Value::Float(float) => *float,
                    _ => return Err(type_error()),
                };
                let divisor = match &right {
                    Value::Int(int) => big_to_f64(int),
                    Value::Float(float) => *float,
                    _ => return Err(type_error()),
                };
                if divisor == 0.0 {
                    return Err(LangError::new(
                        ErrorKind::Domain,
                        span,
                        "float remainder by zero",
                    ));
                }
                Ok(Value::Float(dividend % divisor))
            }
            _ => Err(type_error()),
        },
        TokenKind::Shl | TokenKind::Shr => match (&left, &right) {
            (Value::Int(value), Value::Int(amount)) => {
                if amount.is_negative() {
                    return Err(LangError::new(
                        ErrorKind::Domain,
                        span,
                        "shift amount must be non-negative",
                    ));
                }
                let amount = amount.to_usize().ok_or_else(|| {
                    LangError::new(ErrorKind::Domain, span, "shift amount is too large")
                })?;
                match op.kind {
                    TokenKind::Shl => Ok(Value::Int(value << amount)),
                    _ => Ok(Value::Int(value >> amount)),
                }
            }
            _ => Err(type_error()),
        },
        TokenKind::BitAnd => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            _ => Err(type_error()),
        },
        TokenKind::BitOr => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            _ => Err(type_error()),
        },
        TokenKind::BitXor => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a ^ b)),
            _ => Err(type_error()),
        },
        TokenKind::Equals => Ok(Value::Bool(value_eq(&left, &right))),
        TokenKind::NotEq => Ok(Value::Bool(!value_eq(&left, &right))),
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => {
            let ordering = match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
                (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
                (Value::Int(a), Value::Float(b)) => big_to_f64(a).partial_cmp(b),
                (Value::Float(a), Value::Int(b)) => a.partial_cmp(&big_to_f64(b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(type_error()),
            };

            // incomparable floats (NaN) order as false, not as an error
            let result = match ordering {
                None => false,
                Some(ordering) => match op.kind {
                    TokenKind::Lt => ordering == Ordering::Less,
                    TokenKind::LtEq => ordering != Ordering::Greater,
                    TokenKind::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                },
            };
            Ok(Value::Bool(result))
        }
        kind => Err(LangError::new(
            ErrorKind::Runtime,
            op.span,
            format!("behavior undefined for binary operation {}", kind),
        )),
    }
}

fn evaluate_map(entries: &[(Expr, Expr)], ns: Option<&Namespace>) -> Result<Value, LangError> {
    let mut map = ValueMap::new();

    for (key_expr, value_expr) in entries {
        // a bare identifier key stays an unresolved Ident so that `id:`-style
        // keys keep working; any other key needing a namespace is deferred
        let key = if must_evaluate_lazily(key_expr) && !is_identifier_literal(key_expr) {
            Value::Lazy(lazy_expr(key_expr))
        } else {
            evaluate(key_expr, ns)?
        };

        let value = if must_evaluate_lazily(value_expr) {
            Value::Lazy(lazy_expr(value_expr))
        } else {
            evaluate(value_expr, ns)?
        };

        map.insert(key, value);
    }

    Ok(Value::Map(map))
}

fn evaluate_list(items: &[Expr], ns: Option<&Namespace>) -> Result<Value, LangError> {
    let mut values = Vec::with_capacity(items.len());

    for item in items {
        if must_evaluate_lazily(item) {
            values.push(Value::Lazy(lazy_expr(item)));
        } else {
            values.push(evaluate(item, ns)?);
        }
    }

    Ok(Value::List(values))
}

fn evaluate_attr(
    target_expr: &Expr,
    name: &Token,
    ns: Option<&Namespace>,
) -> Result<Value, LangError> {
    let span = Span::new(target_expr.span().start(), name.span.end());
    let target = force(evaluate(target_expr, ns)?, ns)?;
    let attr = name.text_str();

    let found = match &target {
        Value::Ident(_) => ns.and_then(|ns| ns.get_ident(attr)).cloned(),
        Value::Map(map) => map.get_ident(attr).cloned(),
        other => {
            return Err(LangError::new(
                ErrorKind::Type,
                span,
                format!(
                    "object of type {} does not support attribute access",
                    other.kind()
                ),
            ));
        }
    };

    found.ok_or_else(|| {
        LangError::new(
            ErrorKind::Access,
            span,
            format!(
                "object of type {} does not have a member named {}",
                target.kind(),
                attr
            ),
        )
    })
}

fn evaluate_subscript(
    target_expr: &Expr,
    index_expr: &Expr,
    span: Span,
    ns: Option<&Namespace>,
) -> Result<Value, LangError> {
    let target = force(evaluate(target_expr, ns)?, ns)?;
    let index = force(evaluate(index_expr, ns)?, ns)?;

    match &target {
        Value::Ident(_) => ns
            .and_then(|ns| ns.get(&index))
            .cloned()
            .ok_or_else(|| {
                LangError::new(
                    ErrorKind::Access,
                    span,
                    format!(
                        "object of type {} does not have a member or key named {}",
                        target.kind(),
                        index
                    ),
                )
            }),
        Value::Map(map) => map.get(&index).cloned().ok_or_else(|| {
            LangError::new(
                ErrorKind::Access,
                span,
                format!(
                    "object of type {} does not have a member or key named {}",
                    target.kind(),
                    index
                ),
            )
        }),
        Value::Type(ty) => match ty.name {
            // the parameterized constructors: byte[n], array[len], enum[T]
            TypeName::Byte | TypeName::Array | TypeName::Enum => Ok(Value::Type(TypeValue {
                name: ty.name,
                params: vec![index],
            })),
            other => Err(LangError::new(
                ErrorKind::Type,
                span,
                format!("type {} does not allow type parameters", other),
            )),
        },
        Value::List(items) => {
            let position = match &index {
                Value::Int(int) => int,
                other => {
                    return Err(LangError::new(
                        ErrorKind::Type,
                        span,
                        format!("list indices must be Int, not {}", other.kind()),
                    ));
                }
            };

            position
                .to_usize()
                .and_then(|position| items.get(position))
                .cloned()
                .ok_or_else(|| LangError::new(ErrorKind::Access, span, "index out of bounds"))
        }
        other => Err(LangError::new(
            ErrorKind::Type,
            span,
            format!(
                "object of type {} does not support subscript access",
                other.kind()
            ),
        )),
    }
}
