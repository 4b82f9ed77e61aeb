//! Tracing and logging (shared setup).

pub use crate::tracing::LogFormat;

/// Initialize process-wide observability with JSON logs.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

pub use crate::tracing::init_for_tests;

/// Tracing configuration (filters, layers).
pub mod tracing;
