//! Unrecoverable runtime errors.
//!
//! Fatal errors never propagate as values.
//! They are handed to the fatal hook, which must not return.
//! The default hook logs the error, prints it, and aborts the process.
//! Embedders and tests can install their own hook with [`set_fatal_hook`].

use {
    crate::{Marker, Tag},
    std::{process::abort, sync::RwLock},
    thiserror::Error,
};

/// Error that terminates the computation.
#[derive(Debug, Error)]
pub enum FatalError
{
    /// The heap could not satisfy an allocation request.
    #[error("Out of memory: could not allocate {size} bytes")]
    OutOfMemory
    {
        /// Size of the failed request, in bytes.
        size: usize,
    },

    /// A shared block was passed to reallocation.
    #[error("Cannot reallocate shared block with tag {tag:?}")]
    ReallocShared
    {
        /// Tag of the offending block.
        tag: Tag,
    },

    /// A mutable block was written after promotion to thread-shared.
    #[error("Cannot mutate thread-shared block with tag {tag:?}")]
    MutateShared
    {
        /// Tag of the offending block.
        tag: Tag,
    },

    /// Unwinding reached the top while still yielding.
    #[error("Unhandled effect: no handler for marker {marker}{}", final_suffix(.final_))]
    UnhandledEffect
    {
        /// Marker of the missing handler.
        marker: Marker,

        /// Whether the unwind was non-resumable.
        final_: bool,
    },
}

impl FatalError
{
    /// The errno-style code of the error.
    pub fn code(&self) -> i32
    {
        match self {
            Self::OutOfMemory{..}     => libc::ENOMEM,
            Self::ReallocShared{..}   => libc::EINVAL,
            Self::MutateShared{..}    => libc::EPERM,
            Self::UnhandledEffect{..} => libc::ESRCH,
        }
    }
}

/// Function called with fatal errors.
pub type FatalHook = fn(&FatalError) -> !;

static HOOK: RwLock<FatalHook> = RwLock::new(default_hook);

/// Install a new fatal hook and return the previous one.
///
/// The hook is process-global.
pub fn set_fatal_hook(hook: FatalHook) -> FatalHook
{
    let mut guard = HOOK.write().unwrap_or_else(|err| err.into_inner());
    std::mem::replace(&mut *guard, hook)
}

/// Report a fatal error to the hook.
#[cold]
#[inline(never)]
pub fn fatal(error: FatalError) -> !
{
    // The lock must not be held while the hook runs.
    let hook = *HOOK.read().unwrap_or_else(|err| err.into_inner());
    hook(&error)
}

fn final_suffix(final_: &bool) -> &'static str
{
    if *final_ { " (final)" } else { "" }
}

fn default_hook(error: &FatalError) -> !
{
    tracing::error!(code = error.code(), "{error}");
    eprintln!("tsurara: fatal error {}: {error}", error.code());
    abort()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn codes()
    {
        assert_eq!(FatalError::OutOfMemory{size: 8}.code(), libc::ENOMEM);
        assert_eq!(FatalError::ReallocShared{tag: Tag::REF}.code(), libc::EINVAL);
        assert_eq!(FatalError::MutateShared{tag: Tag::REF}.code(), libc::EPERM);
        let error = FatalError::UnhandledEffect{marker: Marker(3), final_: true};
        assert_eq!(error.code(), libc::ESRCH);
    }

    #[test]
    fn messages()
    {
        let error = FatalError::UnhandledEffect{marker: Marker(7), final_: false};
        assert_eq!(error.to_string(), "Unhandled effect: no handler for marker 7");
        let error = FatalError::UnhandledEffect{marker: Marker(7), final_: true};
        assert_eq!(
            error.to_string(),
            "Unhandled effect: no handler for marker 7 (final)",
        );
        let error = FatalError::ReallocShared{tag: Tag::VECTOR};
        assert_eq!(error.to_string(), "Cannot reallocate shared block with tag VECTOR");
    }
}
