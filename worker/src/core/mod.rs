//! Deterministic, pure logic shared by the worker.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod completion;
pub mod convert;
pub mod hooks;
pub mod ids;
pub mod path;
pub mod scope;
pub mod tools;
pub mod types;
