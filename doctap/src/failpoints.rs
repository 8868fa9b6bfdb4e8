use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, TapResult};

/// Fires inside the flush transaction, after the buffered operations were applied and before the
/// checkpoint is written.
pub const FLUSH_BEFORE_CHECKPOINT: &str = "flush.before_checkpoint";

/// Evaluates the fail point `name`, returning a [`ErrorKind::CheckpointFailed`] error when it is
/// configured to trigger. A no-op unless the `failpoints` feature is enabled.
pub fn tap_fail_point(name: &str) -> TapResult<()> {
    fail_point!(name, |_| {
        bail!(
            ErrorKind::CheckpointFailed,
            "An error occurred in a fail point",
            format!("The fail point '{name}' returned an error")
        );
    });

    Ok(())
}
