//! Suspension of computations for effect handlers.
//!
//! Performing an effect operation does not capture the stack.
//! Instead the operation records, in the context's [`YieldRecord`],
//! which handler it targets and which clause of the handler to run,
//! and then returns normally. Every frame between the operation and
//! the handler observes that the context is yielding, appends a
//! continuation fragment for the rest of its own work with
//! [`yield_extend`][`Context::yield_extend`], and returns.
//! The handler frame finally calls [`prompt`][`Context::prompt`],
//! which takes the record if the marker is its own.
//!
//! The record is a small state machine:
//!
//! ```text
//!           yield_to               yield_extend
//!   None ─────────────▶ Suspended ◀───────────┐
//!    ▲  │                  │  │  └────────────┘
//!    │  │ yield_final      │  │ yield_final
//!    │  ▼                  │  ▼
//!    │  SuspendedFinal ◀───┘──┘
//!    │         │
//!    └─────────┘ prompt (matching marker)
//! ```

pub use self::fragments::{Fragments, YIELD_CONT_MAX};

use {
    crate::{Boxed, Context, FatalError, Function, fatal},
    std::{fmt, mem::take},
};

mod fragments;

/// Identifies a handler frame.
///
/// Markers are generated by [`Context::fresh_marker`].
/// They never exceed [`Marker::MAX`], so every marker
/// boxes to a distinct enum immediate.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Marker(pub (crate) usize);

impl Marker
{
    /// The largest marker; the generator wraps around to one after it.
    pub const MAX: Self = Self(usize::MAX >> 1);

    /// Box the marker, so it can be stored in a free variable.
    pub fn into_boxed(self) -> Boxed
    {
        Boxed::from_enum(self.0)
    }

    /// Unbox a marker stored with [`into_boxed`][`Self::into_boxed`].
    pub fn from_boxed(boxed: &Boxed) -> Option<Self>
    {
        boxed.as_enum().map(Self)
    }
}

impl fmt::Display for Marker
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// State of the yield record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum YieldKind
{
    /// Not yielding; frames return normally.
    #[default]
    None,

    /// Unwinding towards a handler that may resume.
    Suspended,

    /// Unwinding towards a handler that will not resume.
    SuspendedFinal,
}

/// Pending suspension, embedded in the execution context.
#[derive(Default)]
pub enum YieldRecord
{
    /// Not yielding.
    #[default]
    None,

    /// Unwinding towards a handler that may resume.
    Suspended
    {
        /// The targeted handler.
        marker: Marker,

        /// The handler clause to run.
        clause: Function,

        /// The resumption collected so far.
        fragments: Fragments,
    },

    /// Unwinding towards a handler that will not resume.
    SuspendedFinal
    {
        /// The targeted handler.
        marker: Marker,

        /// The handler clause to run.
        clause: Function,
    },
}

impl YieldRecord
{
    /// The state of the record.
    pub fn kind(&self) -> YieldKind
    {
        match self {
            Self::None => YieldKind::None,
            Self::Suspended{..} => YieldKind::Suspended,
            Self::SuspendedFinal{..} => YieldKind::SuspendedFinal,
        }
    }

    /// Whether a suspension is pending.
    pub fn is_yielding(&self) -> bool
    {
        !matches!(self, Self::None)
    }

    /// The targeted handler, or the zero marker when not yielding.
    pub fn marker(&self) -> Marker
    {
        match self {
            Self::None => Marker::default(),
            Self::Suspended{marker, ..} | Self::SuspendedFinal{marker, ..} => *marker,
        }
    }

    /// Number of occupied fragment slots.
    pub fn fragment_count(&self) -> usize
    {
        match self {
            Self::Suspended{fragments, ..} => fragments.len(),
            _ => 0,
        }
    }

    /// Release the clause and fragments of the record.
    pub fn release(self, ctx: &mut Context)
    {
        match self {
            Self::None => (),
            Self::Suspended{clause, fragments, ..} => {
                clause.release(ctx);
                fragments.release(ctx);
            },
            Self::SuspendedFinal{clause, ..} => clause.release(ctx),
        }
    }

    fn fragments_mut(&mut self) -> Option<&mut Fragments>
    {
        match self {
            Self::Suspended{fragments, ..} => Some(fragments),
            _ => None,
        }
    }
}

/// What a handler frame must do after the body returned.
pub enum Prompt
{
    /// The body returned normally.
    Return,

    /// The body is yielding to an outer handler.
    /// The frame must extend the record and return.
    Propagate,

    /// The body yielded to this handler.
    Resumable
    {
        /// The handler clause to run.
        clause: Function,

        /// The rest of the body, to be resumed by the clause.
        resumption: Resumption,
    },

    /// The body yielded to this handler and cannot be resumed.
    Final
    {
        /// The handler clause to run.
        clause: Function,
    },
}

/// The captured rest of a computation between an operation and its handler.
pub struct Resumption
{
    fragments: Fragments,
}

impl Resumption
{
    /// Number of fragment slots.
    pub fn len(&self) -> usize
    {
        self.fragments.len()
    }

    /// Whether the resumption is the identity.
    pub fn is_empty(&self) -> bool
    {
        self.fragments.is_empty()
    }

    /// Compose the fragments front to back into a single function.
    pub fn into_function(self, ctx: &mut Context) -> Function
    {
        self.fragments.compose(ctx)
    }

    /// Resume the computation with a value.
    pub fn resume(self, value: Boxed, ctx: &mut Context) -> Boxed
    {
        self.into_function(ctx).call(value, ctx)
    }

    /// Discard the computation.
    pub fn release(self, ctx: &mut Context)
    {
        self.fragments.release(ctx);
    }
}

impl Context
{
    /// The pending suspension.
    pub fn yield_record(&self) -> &YieldRecord
    {
        &self.yield_record
    }

    /// The state of the pending suspension.
    pub fn yield_kind(&self) -> YieldKind
    {
        self.yield_record.kind()
    }

    /// Whether a suspension is pending.
    pub fn yielding(&self) -> bool
    {
        self.yield_record.is_yielding()
    }

    /// Whether a resumable suspension is pending.
    pub fn yielding_non_final(&self) -> bool
    {
        self.yield_kind() == YieldKind::Suspended
    }

    /// Start unwinding towards the handler with the given marker.
    ///
    /// Returns unit, which the operation returns to its caller.
    pub fn yield_to(&mut self, marker: Marker, clause: Function) -> Boxed
    {
        debug_assert!(!self.yielding(), "Already yielding");
        let pending = take(&mut self.yield_record);
        pending.release(self);
        self.yield_record = YieldRecord::Suspended{
            marker,
            clause,
            fragments: Fragments::default(),
        };
        Boxed::unit()
    }

    /// Start a non-resumable unwind towards the handler with the given marker.
    ///
    /// A pending resumable suspension is replaced,
    /// and its fragments are released.
    pub fn yield_final(&mut self, marker: Marker, clause: Function) -> Boxed
    {
        let pending = take(&mut self.yield_record);
        pending.release(self);
        self.yield_record = YieldRecord::SuspendedFinal{marker, clause};
        Boxed::unit()
    }

    /// Append the continuation of the current frame to the resumption.
    ///
    /// During a non-resumable unwind the fragment is released instead.
    /// Returns unit, which the frame returns to its caller.
    pub fn yield_extend(&mut self, fragment: Function) -> Boxed
    {
        debug_assert!(self.yielding(), "Extending without yielding");
        let Some(fragments) = self.yield_record.fragments_mut() else {
            fragment.release(self);
            return Boxed::unit();
        };
        if let Err(fragment) = fragments.try_push(fragment) {
            let full = take(fragments);
            let chained = full.overflow(fragment, self);
            match self.yield_record.fragments_mut() {
                Some(fragments) => *fragments = chained,
                None => chained.release(self),
            }
        }
        Boxed::unit()
    }

    /// Decide what the handler frame with the given marker must do.
    ///
    /// If the pending suspension targets this handler,
    /// the record is taken and reset.
    pub fn prompt(&mut self, marker: Marker) -> Prompt
    {
        match &self.yield_record {
            YieldRecord::None => return Prompt::Return,
            record if record.marker() != marker => return Prompt::Propagate,
            _ => (),
        }
        match take(&mut self.yield_record) {
            YieldRecord::None => Prompt::Return,
            YieldRecord::Suspended{clause, fragments, ..} =>
                Prompt::Resumable{clause, resumption: Resumption{fragments}},
            YieldRecord::SuspendedFinal{clause, ..} =>
                Prompt::Final{clause},
        }
    }

    /// Check that no suspension escaped the outermost frame.
    ///
    /// A pending suspension here has no handler, which is fatal.
    pub fn unwind_top(&mut self)
    {
        let kind = self.yield_kind();
        if kind != YieldKind::None {
            fatal(FatalError::UnhandledEffect{
                marker: self.yield_record.marker(),
                final_: kind == YieldKind::SuspendedFinal,
            });
        }
    }
}
