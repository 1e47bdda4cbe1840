//! Telemetry: exactly one record per run, spooled into the state
//! directory for the reporting agent to pick up. Emission is best-effort
//! and never changes the run's outcome.

use crate::config::Config;
use log::warn;
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub(crate) struct UpdateRecord {
    pub current_version: Option<u32>,
    pub server_version: Option<u32>,
    pub result: i32,
    pub elapsed: Duration,
}

impl UpdateRecord {
    fn severity(&self) -> &'static str {
        if self.result == 0 {
            "info"
        } else {
            "crit"
        }
    }

    fn render(&self) -> String {
        let version = |v: Option<u32>| v.map_or(-1, i64::from);
        format!(
            "current_version={}\nserver_version={}\nresult={}\ntime={:.1}\n",
            version(self.current_version),
            version(self.server_version),
            self.result,
            self.elapsed.as_secs_f64(),
        )
    }
}

pub(crate) fn emit(config: &Config, record: &UpdateRecord) {
    let dir = config.telemetry_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let name = format!(
        "{}.{}.update.{}",
        stamp,
        std::process::id(),
        record.severity()
    );
    let write = fs::create_dir_all(&dir).and_then(|()| fs::write(dir.join(&name), record.render()));
    if let Err(err) = write {
        warn!("Failed to spool telemetry record: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_has_the_expected_shape() {
        let record = UpdateRecord {
            current_version: Some(100),
            server_version: Some(110),
            result: 0,
            elapsed: Duration::from_millis(12_340),
        };
        assert_eq!(
            record.render(),
            "current_version=100\nserver_version=110\nresult=0\ntime=12.3\n"
        );
        assert_eq!(record.severity(), "info");
    }

    #[test]
    fn unknown_versions_render_as_minus_one() {
        let record = UpdateRecord {
            current_version: Some(100),
            server_version: None,
            result: 14,
            elapsed: Duration::ZERO,
        };
        assert_eq!(
            record.render(),
            "current_version=100\nserver_version=-1\nresult=14\ntime=0.0\n"
        );
        assert_eq!(record.severity(), "crit");
    }

    #[test]
    fn emit_spools_one_file() {
        let state = tempfile::TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            r#"
            version_url = "https://update.example.org"
            content_url = "https://update.example.org"
            state_dir = "{}"
            "#,
            state.path().display()
        ))
        .unwrap();

        emit(
            &config,
            &UpdateRecord {
                current_version: Some(100),
                server_version: Some(110),
                result: 0,
                elapsed: Duration::from_secs(3),
            },
        );

        let spool: Vec<_> = fs::read_dir(config.telemetry_dir())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(spool.len(), 1);
        let body = fs::read_to_string(spool[0].path()).unwrap();
        assert!(body.contains("result=0\n"));
        assert!(spool[0].file_name().to_string_lossy().ends_with("update.info"));
    }
}
