//! BinDef: a declarative language for describing binary file formats, and a
//! runtime that applies such descriptions to concrete files.
//!
//! A definition (a `.bdf` document) is a single map expression describing how
//! to recognize one binary format and how to extract a structured view of its
//! contents. The pipeline, leaves first:
//!
//! 1. [`lex`] turns source bytes into a token stream with exact positions.
//! 2. [`parse`] turns tokens into an expression tree.
//! 3. [`evaluate`] reduces expression trees to tagged [`Value`]s, deferring
//!    anything that needs fields not yet bound as lazy closures.
//! 4. [`binary::apply`] walks the evaluated document, reading bytes from a
//!    seekable input and producing named field/value pairs.
//!
//! ```
//! use bindef::{evaluate, lex, parse, Value};
//!
//! let source = br#"{
//!     meta: { bdf: "0.1", name: "Example" },
//!     binary: [{ id: version, type: uint8 }],
//! }"#;
//!
//! let document = evaluate(&parse(lex(source)?)?, None)?;
//! assert!(matches!(document, Value::Map(_)));
//! # Ok::<(), bindef::LangError>(())
//! ```
//!
//! Drivers that try several definitions against one file should treat a
//! [`MagicError`](crate::ErrorKind::Magic) from the applier as "this
//! definition does not describe this file" and every other error as "the
//! definition matched but extraction failed".

#![warn(rust_2018_idioms)]

pub mod binary;
pub mod diagnostics;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use crate::diagnostics::{ErrorKind, LangError};
pub use crate::eval::evaluate;
pub use crate::lexer::{lex, Token, TokenKind};
pub use crate::parser::{parse, Expr};
pub use crate::value::{LazyValue, Namespace, TypeName, Value, ValueMap};
