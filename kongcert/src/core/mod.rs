//! Deterministic, pure logic shared by the installer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod domains;
pub mod invariants;
pub mod mirror;
pub mod types;
