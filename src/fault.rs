//! Fault reporter for violated invariants.
//!
//! Only reached from builds with the `strict-bounds` feature, where an
//! out-of-bounds access is treated as a programming error rather than a
//! recoverable condition.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use colored::Colorize;
use tracing::error;

/// Reports a violated invariant and halts.
///
/// Prints the component, the condition that failed and the formatted context to
/// stderr, followed by a backtrace when `RUST_BACKTRACE` enables one. Halting is
/// a panic, which becomes a process abort under `panic = "abort"`.
#[cold]
#[track_caller]
pub fn report(component: &str, condition: &str, context: fmt::Arguments<'_>) -> ! {
    let location = std::panic::Location::caller();
    eprintln!(
        "{} <{}>: at {}:{} `{}` failed: {}",
        "ASSERT:".red().bold(),
        component,
        location.file(),
        location.line(),
        condition,
        context
    );
    error!(component, condition, %context, "invariant violated");

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        eprintln!("<{}>: Stack trace:\n{}", component.yellow(), backtrace);
    }

    panic!(
        "<{component}>: invariant `{condition}` violated at {}:{}: {context}",
        location.file(),
        location.line()
    );
}
