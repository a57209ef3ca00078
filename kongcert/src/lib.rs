//! Transactional certificate and route installer for the Kong admin API.
//!
//! Gateway writes cannot be grouped into a transaction, so every intent is
//! recorded as a reversible [`change::Change`] and a batch is applied with a
//! manual undo log. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, mirror lookups,
//!   invariants, wildcard matching). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (admin API client, config,
//!   checkpoints, certificate files). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`invoker`], [`installer`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod change;
pub mod core;
pub mod exit_codes;
pub mod installer;
pub mod invoker;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
