//! Stable exit codes for kongcert CLI commands.

use crate::installer::{CheckpointFailed, SaveFailed};
use crate::invoker::InvokerError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config, precondition, or any error not listed below.
pub const INVALID: i32 = 1;
/// Applying or checkpointing changes failed and every executed change was
/// undone.
pub const ROLLED_BACK: i32 = 2;
/// An undo failed; the gateway may not match any checkpoint.
pub const INCONSISTENT: i32 = 3;

/// Map an error chain to the exit code reporting it.
pub fn for_error(err: &anyhow::Error) -> i32 {
    let mut code = INVALID;
    for cause in err.chain() {
        if let Some(InvokerError::RollbackIncomplete(_)) = cause.downcast_ref::<InvokerError>() {
            return INCONSISTENT;
        }
        if cause.downcast_ref::<SaveFailed>().is_some()
            || cause.downcast_ref::<CheckpointFailed>().is_some()
        {
            code = ROLLED_BACK;
        }
    }
    code
}
