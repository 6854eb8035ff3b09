//! Generic error handling primitives shared across the workspace.
#![deny(warnings)]
#![deny(missing_docs)]

/// A generic, opaque error.
///
/// Used at API boundaries where callers only need to log or wrap a failure rather than match on
/// its exact shape. Components that need callers to distinguish failure modes define their own
/// typed errors and convert to [`GenericError`] at the boundary.
pub type GenericError = anyhow::Error;

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (same syntax as `std::format!`), or an
/// existing value implementing `Debug` and `Display`, such as another error. When the given value
/// is itself an error, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}
