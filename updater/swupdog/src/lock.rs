//! Single-instance enforcement with an advisory lock in the state
//! directory. The lock is released when the guard drops, which the
//! teardown path reaches no matter which stage failed.

use crate::error::{self, Result};
use fs2::FileExt;
use log::debug;
use snafu::ResultExt;
use std::fs::File;
use std::path::Path;

const LOCK_FILENAME: &str = "swupdog.lock";

/// Held for the lifetime of the run.
#[derive(Debug)]
pub(crate) struct ProcessLock {
    _file: File,
}

pub(crate) fn acquire(state_dir: &Path) -> Result<ProcessLock> {
    let path = state_dir.join(LOCK_FILENAME);
    let file = File::create(&path).context(error::LockFileSnafu { path: &path })?;
    file.try_lock_exclusive()
        .context(error::LockBusySnafu { path: &path })?;
    debug!("Obtained exclusive update lock");
    Ok(ProcessLock { _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let state = TempDir::new().unwrap();
        let held = acquire(state.path()).unwrap();
        assert!(matches!(
            acquire(state.path()),
            Err(Error::LockBusy { .. })
        ));

        drop(held);
        acquire(state.path()).unwrap();
    }
}
