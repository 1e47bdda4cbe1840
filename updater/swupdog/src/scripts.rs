//! Pre- and post-update hooks. Hooks get the update root as their only
//! argument; their failures are logged and never fail the update.

use log::{info, warn};
use std::path::Path;
use std::process::Command;

pub(crate) fn run_hook(what: &str, script: Option<&Path>, path_prefix: &Path) {
    let Some(script) = script else {
        return;
    };
    info!("Running {} script {}", what, script.display());
    match Command::new(script).arg(path_prefix).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("{} script exited with {}", what, status),
        Err(err) => warn!("Failed to run {} script: {}", what, err),
    }
}
