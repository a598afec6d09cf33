use pretty_assertions::assert_eq;

use bindef::lexer::{lex, TokenKind};
use bindef::parser::{parse, Expr};
use bindef::ErrorKind;

fn parse_source(source: &[u8]) -> Expr {
    parse(lex(source).unwrap()).unwrap()
}

fn op_kind(expr: &Expr) -> Option<TokenKind> {
    match expr {
        Expr::Binary { op, .. } => Some(op.kind),
        Expr::Unary { op, .. } => Some(op.kind),
        _ => None,
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let expr = parse_source(b"1 + 2 * 3");
    match &expr {
        Expr::Binary { op, left, right } => {
            assert_eq!(op.kind, TokenKind::Plus);
            assert!(matches!(**left, Expr::Literal(_)));
            assert_eq!(op_kind(right), Some(TokenKind::Mul));
        }
        other => panic!("expected a binary node, found {:?}", other),
    }
}

#[test]
fn comparison_binds_looser_than_arithmetic() {
    let expr = parse_source(b"1 + 2 == 3");
    match &expr {
        Expr::Binary { op, left, .. } => {
            assert_eq!(op.kind, TokenKind::Equals);
            assert_eq!(op_kind(left), Some(TokenKind::Plus));
        }
        other => panic!("expected a binary node, found {:?}", other),
    }
}

#[test]
fn logical_operators_bind_loosest() {
    let expr = parse_source(b"a == 1 && b == 2 || c");
    match &expr {
        Expr::Binary { op, left, .. } => {
            assert_eq!(op.kind, TokenKind::LogicalOr);
            assert_eq!(op_kind(left), Some(TokenKind::LogicalAnd));
        }
        other => panic!("expected a binary node, found {:?}", other),
    }
}

#[test]
fn unary_operators_bind_tighter_than_binary_ones() {
    let expr = parse_source(b"-7 % 2");
    match &expr {
        Expr::Binary { op, left, .. } => {
            assert_eq!(op.kind, TokenKind::Modulo);
            assert_eq!(op_kind(left), Some(TokenKind::Minus));
        }
        other => panic!("expected a binary node, found {:?}", other),
    }
}

#[test]
fn postfix_operations_chain_left_to_right() {
    let expr = parse_source(b"header.entries[0]");
    match &expr {
        Expr::Subscript { target, .. } => {
            assert!(matches!(**target, Expr::Attr { .. }));
        }
        other => panic!("expected a subscript node, found {:?}", other),
    }

    let expr = parse_source(b"slice(name, 0, 4)");
    match &expr {
        Expr::Call { callee, args, .. } => {
            assert!(matches!(**callee, Expr::Literal(_)));
            assert_eq!(args.len(), 3);
        }
        other => panic!("expected a call node, found {:?}", other),
    }
}

#[test]
fn node_spans_stretch_from_target_to_closing_token() {
    let source = b"header.entries[0]";
    let expr = parse_source(source);
    assert_eq!(expr.span().start().to_usize(), 0);
    assert_eq!(expr.span().end().to_usize(), source.len());
}

#[test]
fn map_literals_preserve_entry_order_and_allow_trailing_commas() {
    let expr = parse_source(b"{ b: 1, a: [2, 3,], }");
    match &expr {
        Expr::Map { entries, .. } => {
            assert_eq!(entries.len(), 2);
            assert!(matches!(entries[1].1, Expr::List { .. }));
        }
        other => panic!("expected a map node, found {:?}", other),
    }
}

#[test]
fn parenthesized_expressions_regroup() {
    let expr = parse_source(b"(1 + 2) * 3");
    match &expr {
        Expr::Binary { op, left, .. } => {
            assert_eq!(op.kind, TokenKind::Mul);
            assert_eq!(op_kind(left), Some(TokenKind::Plus));
        }
        other => panic!("expected a binary node, found {:?}", other),
    }
}

#[test]
fn parsing_is_deterministic() {
    let source = b"{ meta: { name: \"x\" }, binary: [{ id: a, type: uint8 }] }";
    assert_eq!(
        parse(lex(source).unwrap()).unwrap(),
        parse(lex(source).unwrap()).unwrap(),
    );
}

#[test]
fn syntax_errors_localize_the_problem() {
    let error = parse(lex(b"{ a 1 }").unwrap()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);
    // points just past the key that is missing its colon
    assert_eq!(error.span.start().to_usize(), 3);

    let error = parse(lex(b"[1, 2").unwrap()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);

    let error = parse(lex(b"(1 + 2").unwrap()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);

    let error = parse(lex(b"entries.0").unwrap()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);
}

#[test]
fn trailing_tokens_are_rejected() {
    let error = parse(lex(b"1 2").unwrap()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Syntax);
}
