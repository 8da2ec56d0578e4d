//! Reference-counted heap and effect suspension for compiled code.
//!
//! Generated code calls into this crate for every allocation,
//! every duplication and release of a value, and every effect operation.
//! All of these take the [`Context`] of the current thread.
//!
//! Values are [`Boxed`] words: either immediates or references to
//! [`Block`]s. Blocks are reference counted with a fast path for
//! the thread-local case; see the [`refcount`] module.
//! Uniquely owned blocks can be recycled in place with [`Reuse`].
//! Effect handlers are implemented by unwinding through the
//! [`YieldRecord`] of the context; see the [`effect`] module.
//!
//! # Examples
//!
//! ```
//! use tsurara::{Boxed, Context, RuntimeConfig, Vector};
//! let mut ctx = Context::new(RuntimeConfig::default());
//! let vector = Vector::new(3, Boxed::from_small_int(7).unwrap(), &mut ctx);
//! assert_eq!(vector.at(2).and_then(|x| x.as_small_int()), Some(7));
//! vector.release(&mut ctx);
//! assert_eq!(ctx.heap_stats().live(), 0);
//! ```

#![warn(missing_docs)]

pub use self::{
    block::*,
    boxed::*,
    config::*,
    context::*,
    effect::{
        Fragments, Marker, Prompt, Resumption,
        YIELD_CONT_MAX, YieldKind, YieldRecord,
    },
    fatal::*,
    header::*,
    heap::*,
    integer::*,
    refcount::{Ownership, RC_SHARED, RC_STICKY, ThreadShared},
    reuse::*,
    value::*,
};

pub mod effect;
pub mod refcount;

mod block;
mod boxed;
mod config;
mod context;
mod fatal;
mod header;
mod heap;
mod integer;
mod reuse;
mod value;
