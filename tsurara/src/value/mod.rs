//! Typed views of the built-in block kinds.
//!
//! Each wrapper owns one reference to a block with the matching tag.
//! The unit value is the immediate [`Boxed::unit`][`crate::Boxed::unit`].

pub use self::{function::*, raw::{Raw, RawFree}, reference::*, vector::*};

mod function;
pub (crate) mod raw;
mod reference;
mod vector;
