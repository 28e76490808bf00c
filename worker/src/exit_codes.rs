//! Stable exit codes for the worker CLI.

/// Every task in the story completed.
pub const OK: i32 = 0;
/// Configuration, provisioning, or other fatal error.
pub const ERROR: i32 = 1;
/// Cycle or time budget exhausted with tasks still open.
pub const INCOMPLETE: i32 = 2;
