//! Fatal coordination failures.
//!
//! A logic error means two CPUs disagreed about a protocol that has no guest-visible recovery
//! (interlock not held, an exclusive-use counter changed under its owner, a bounded retry that
//! never converged). Continuing would silently corrupt shared state, so these never become
//! `Result`s.
//!
//! The error is logged and then raised as a panic. Release builds use `panic = "abort"`, which
//! terminates the process on the spot; unit tests can still observe the path with
//! `#[should_panic]`.

use core::fmt;

/// Report a coordination bug and stop.
#[cold]
#[track_caller]
pub fn logic_error(args: fmt::Arguments<'_>) -> ! {
    let location = core::panic::Location::caller();
    tracing::error!(%location, "internal logic error: {args}");
    panic!("internal logic error: {args}");
}

/// `format!`-style front end for [`logic_error`].
#[macro_export]
macro_rules! logic_error {
    ($($arg:tt)*) => {
        $crate::fatal::logic_error(::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "internal logic error: lock word changed to 0x7")]
    fn logic_error_panics_with_formatted_message() {
        crate::logic_error!("lock word changed to {:#x}", 7);
    }
}
