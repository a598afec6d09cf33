//! Runtime support for applying BinDef definitions to binary data.
//!
//! The definition applier needs nothing more than a seekable source of
//! bytes, so this crate defines that surface ([`SeekRead`]) together with an
//! in-memory implementation ([`SliceReader`]) suitable for tests and
//! embedding. Anything that implements [`std::io::Read`] and
//! [`std::io::Seek`] (files, cursors) gets an implementation for free.

#![warn(rust_2018_idioms)]

mod read;

pub use crate::read::{ReadError, SeekRead, SliceReader, Whence};
