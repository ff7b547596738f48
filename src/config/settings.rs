use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::runner::{Buckets, RunnerSettings};

/// Logical hosts served by the page route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostSettings {
    /// Host name of the package compile front end.
    pub compile: String,
    /// Host name of the playground front end.
    pub play: String,
    /// Host serving published index pages, linked from the compile page.
    pub index: String,
    /// Host serving published scripts.
    pub pkg: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            compile: "compile.jsgo.io".into(),
            play: "play.jsgo.io".into(),
            index: "jsgo.io".into(),
            pkg: "pkg.jsgo.io".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub max_queue: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSettings {
    pub concurrent_uploads: usize,
    /// Root directory of the blob store.
    pub blob_root: PathBuf,
    /// JSON-lines file receiving job records.
    pub record_path: PathBuf,
    pub src_bucket: String,
    pub pkg_bucket: String,
    pub index_bucket: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let buckets = Buckets::default();
        Self {
            concurrent_uploads: 10,
            blob_root: PathBuf::from("data/blobs"),
            record_path: PathBuf::from("data/records.jsonl"),
            src_bucket: buckets.src,
            pkg_bucket: buckets.pkg,
            index_bucket: buckets.index,
        }
    }
}

/// Durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub ping_period_ms: u64,
    pub pong_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub instruction_timeout_ms: u64,
    pub drain_delay_ms: u64,
    /// How long shutdown waits for running connections before exiting.
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            ping_period_ms: 10_000,
            pong_timeout_ms: 20_000,
            write_timeout_ms: 10_000,
            connection_timeout_ms: 300_000,
            instruction_timeout_ms: 5_000,
            drain_delay_ms: 200,
            shutdown_grace_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Program and arguments; run once per flavor inside the source tree.
    pub command: Vec<String>,
    /// Directory package sources are resolved from.
    pub source_root: PathBuf,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            source_root: PathBuf::from("data/src"),
        }
    }
}

/// Complete service configuration, as read from `buildfarm.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub listen: String,
    /// Directory holding `favicon.ico` and `compile.css`.
    pub assets_dir: PathBuf,
    pub hosts: HostSettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
    pub timeouts: TimeoutSettings,
    pub compiler: CompilerSettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            assets_dir: PathBuf::from("assets"),
            hosts: HostSettings::default(),
            queue: QueueSettings::default(),
            storage: StorageSettings::default(),
            timeouts: TimeoutSettings::default(),
            compiler: CompilerSettings::default(),
        }
    }
}

impl ServiceSettings {
    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        let capacities = [
            ("queue.max_concurrent", self.queue.max_concurrent),
            ("storage.concurrent_uploads", self.storage.concurrent_uploads),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(format!("{name} must be at least 1"));
            }
        }

        let timeouts = &self.timeouts;
        if timeouts.ping_period_ms == 0 {
            return Err("timeouts.ping_period_ms must be at least 1".into());
        }
        if timeouts.pong_timeout_ms <= timeouts.ping_period_ms {
            return Err(format!(
                "timeouts.pong_timeout_ms ({}) must exceed timeouts.ping_period_ms ({})",
                timeouts.pong_timeout_ms, timeouts.ping_period_ms
            ));
        }
        if timeouts.write_timeout_ms == 0 || timeouts.connection_timeout_ms == 0 {
            return Err("write and connection timeouts must be at least 1 ms".into());
        }
        Ok(())
    }

    pub fn to_connection_settings(&self) -> ConnectionSettings {
        let t = &self.timeouts;
        ConnectionSettings {
            ping_period: Duration::from_millis(t.ping_period_ms),
            pong_timeout: Duration::from_millis(t.pong_timeout_ms),
            write_timeout: Duration::from_millis(t.write_timeout_ms),
            connection_timeout: Duration::from_millis(t.connection_timeout_ms),
            drain_delay: Duration::from_millis(t.drain_delay_ms),
            ..ConnectionSettings::default()
        }
    }

    pub fn to_runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            instruction_timeout: Duration::from_millis(self.timeouts.instruction_timeout_ms),
            concurrent_uploads: self.storage.concurrent_uploads,
            buckets: Buckets {
                src: self.storage.src_bucket.clone(),
                pkg: self.storage.pkg_bucket.clone(),
                index: self.storage.index_bucket.clone(),
            },
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let settings: ServiceSettings = toml::from_str(
            r#"
            listen = "127.0.0.1:9000"

            [queue]
            max_concurrent = 4
            "#,
        )
        .unwrap();

        assert_eq!(settings.listen, "127.0.0.1:9000");
        assert_eq!(settings.queue.max_concurrent, 4);
        assert_eq!(settings.queue.max_queue, 100, "unset field keeps its default");
        assert_eq!(settings.hosts, HostSettings::default());
    }

    #[test]
    fn default_settings_are_valid() {
        assert_eq!(ServiceSettings::default().validate(), Ok(()));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut settings = ServiceSettings::default();
        settings.queue.max_concurrent = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.contains("queue.max_concurrent"), "unexpected message: {err}");
    }

    #[test]
    fn zero_max_queue_is_allowed() {
        let mut settings = ServiceSettings::default();
        settings.queue.max_queue = 0;
        assert_eq!(settings.validate(), Ok(()), "no backlog is a valid policy");
    }

    #[test]
    fn pong_timeout_must_exceed_ping_period() {
        let mut settings = ServiceSettings::default();
        settings.timeouts.pong_timeout_ms = settings.timeouts.ping_period_ms;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn conversions_carry_durations_and_buckets() {
        let mut settings = ServiceSettings::default();
        settings.timeouts.drain_delay_ms = 50;
        settings.storage.pkg_bucket = "packages".into();

        let connection = settings.to_connection_settings();
        assert_eq!(connection.drain_delay, Duration::from_millis(50));
        assert_eq!(connection.ping_period, Duration::from_secs(10));
        assert_eq!(connection.outbound_capacity, ConnectionSettings::default().outbound_capacity);

        let runner = settings.to_runner_settings();
        assert_eq!(runner.buckets.pkg, "packages");
        assert_eq!(runner.instruction_timeout, Duration::from_secs(5));
    }
}
