//! Configuration for the leaderless service and reaper
//!
//! Sources are layered in this order (later wins):
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `LEADERLESS__*` environment variables (`__` separates nested keys,
//!    e.g. `LEADERLESS__DATABASE__PASSWORD`)
//!
//! Binaries apply their CLI flags on top of the loaded value.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "leaderless.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LEADERLESS";

/// How many matching replicas a read needs before its value is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadAgreement {
    /// One more than the read quorum (`R + 1`).
    Strict,
    /// Exactly the read quorum (`R`).
    Quorum,
}

impl Default for ReadAgreement {
    fn default() -> Self {
        ReadAgreement::Strict
    }
}

impl std::fmt::Display for ReadAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadAgreement::Strict => write!(f, "strict"),
            ReadAgreement::Quorum => write!(f, "quorum"),
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Fraction of replicas a write must reach, in (0, 1]
    #[serde(default = "default_fraction")]
    pub write_fraction: f64,

    /// Fraction of replicas a read must reach, in (0, 1]
    #[serde(default = "default_fraction")]
    pub read_fraction: f64,

    #[serde(default)]
    pub read_agreement: ReadAgreement,

    /// Deadline for each per-replica step (acquire, execute, commit)
    #[serde(default = "default_replica_timeout")]
    pub replica_timeout_ms: u64,

    /// Relation holding the records on every replica
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub replicas: ReplicasConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_fraction() -> f64 {
    0.51
}
fn default_replica_timeout() -> u64 {
    5_000
}
fn default_table() -> String {
    "mytable".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            write_fraction: default_fraction(),
            read_fraction: default_fraction(),
            read_agreement: ReadAgreement::default(),
            replica_timeout_ms: default_replica_timeout(),
            table: default_table(),
            database: DatabaseConfig::default(),
            replicas: ReplicasConfig::default(),
        }
    }
}

/// Connection parameters shared by every replica
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_user() -> String {
    "postgres".to_string()
}
fn default_dbname() -> String {
    "postgres".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_min_connections() -> u32 {
    1
}
fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            password: String::new(),
            dbname: default_dbname(),
            port: default_port(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
        }
    }
}

// Keeps the password out of logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("port", &self.port)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Where the replica endpoints come from. Exactly one source must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicasConfig {
    /// Explicit `host` or `host:port` entries
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Kubernetes StatefulSet pod naming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statefulset: Option<StatefulSetConfig>,
}

/// Pods are addressed as `{name}-{i}.{service}.{namespace}.svc.cluster.local`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatefulSetConfig {
    pub name: String,
    pub service: String,
    pub namespace: String,
    pub count: usize,
}

impl StatefulSetConfig {
    pub fn hostnames(&self) -> Vec<String> {
        (0..self.count)
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.cluster.local",
                    self.name, i, self.service, self.namespace
                )
            })
            .collect()
    }
}

/// One resolved replica address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEndpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for ReplicaEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl ReplicaEndpoint {
    /// Parse `host` or `host:port`, falling back to `default_port`.
    pub fn parse(entry: &str, default_port: u16) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::InvalidConfig("empty replica endpoint".into()));
        }
        match entry.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse().map_err(|_| {
                    Error::InvalidConfig(format!("invalid port in replica endpoint: {}", entry))
                })?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            Some(_) => Err(Error::InvalidConfig(format!(
                "missing host in replica endpoint: {}",
                entry
            ))),
            None => Ok(Self {
                host: entry.to_string(),
                port: default_port,
            }),
        }
    }
}

/// `LEADERLESS__*` variables, `__` between nesting levels.
///
/// `LEADERLESS__REPLICAS__ENDPOINTS` takes a comma-separated list.
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("replicas.endpoints")
        .try_parsing(true)
}

impl ServiceConfig {
    /// Load from an optional file plus the environment.
    ///
    /// With `path == None` the default file is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn replica_timeout(&self) -> Duration {
        Duration::from_millis(self.replica_timeout_ms)
    }

    /// Resolve the configured replica source into endpoints, in order.
    pub fn endpoints(&self) -> Result<Vec<ReplicaEndpoint>> {
        match (&self.replicas.statefulset, self.replicas.endpoints.is_empty()) {
            (Some(_), false) => Err(Error::InvalidConfig(
                "replicas.endpoints and replicas.statefulset are mutually exclusive".into(),
            )),
            (Some(sts), true) => Ok(sts
                .hostnames()
                .into_iter()
                .map(|host| ReplicaEndpoint {
                    host,
                    port: self.database.port,
                })
                .collect()),
            (None, _) => self
                .replicas
                .endpoints
                .iter()
                .map(|e| ReplicaEndpoint::parse(e, self.database.port))
                .collect(),
        }
    }

    /// Check everything that can be checked without touching a replica.
    pub fn validate(&self) -> Result<()> {
        for (label, fraction) in [
            ("write_fraction", self.write_fraction),
            ("read_fraction", self.read_fraction),
        ] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    label, fraction
                )));
            }
        }
        if self.write_fraction + self.read_fraction <= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "write_fraction + read_fraction must exceed 1 (got {} + {})",
                self.write_fraction, self.read_fraction
            )));
        }
        if self.replica_timeout_ms == 0 {
            return Err(Error::InvalidConfig("replica_timeout_ms must be > 0".into()));
        }
        if self.database.max_connections == 0
            || self.database.min_connections > self.database.max_connections
        {
            return Err(Error::InvalidConfig(format!(
                "invalid pool bounds: min {} max {}",
                self.database.min_connections, self.database.max_connections
            )));
        }
        crate::common::utils::validate_identifier(&self.table)?;
        if self.endpoints()?.is_empty() {
            return Err(Error::InvalidConfig("no replicas configured".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_endpoints(endpoints: &[&str]) -> ServiceConfig {
        ServiceConfig {
            replicas: ReplicasConfig {
                endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
                statefulset: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.write_fraction, 0.51);
        assert_eq!(config.read_fraction, 0.51);
        assert_eq!(config.read_agreement, ReadAgreement::Strict);
        assert_eq!(config.table, "mytable");
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.replica_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_statefulset_hostnames() {
        let sts = StatefulSetConfig {
            name: "pg".into(),
            service: "pg-headless".into(),
            namespace: "demo".into(),
            count: 3,
        };
        assert_eq!(
            sts.hostnames(),
            vec![
                "pg-0.pg-headless.demo.svc.cluster.local",
                "pg-1.pg-headless.demo.svc.cluster.local",
                "pg-2.pg-headless.demo.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            ReplicaEndpoint::parse("db-0:6543", 5432).unwrap(),
            ReplicaEndpoint {
                host: "db-0".into(),
                port: 6543
            }
        );
        assert_eq!(ReplicaEndpoint::parse("db-1", 5432).unwrap().port, 5432);
        assert!(ReplicaEndpoint::parse("db:notaport", 5432).is_err());
        assert!(ReplicaEndpoint::parse(":5432", 5432).is_err());
        assert!(ReplicaEndpoint::parse("  ", 5432).is_err());
    }

    #[test]
    fn test_validate_rejects_weak_fractions() {
        let mut config = with_endpoints(&["a", "b", "c"]);
        assert!(config.validate().is_ok());

        config.write_fraction = 0.5;
        config.read_fraction = 0.5;
        assert!(config.validate().is_err());

        config.write_fraction = 1.2;
        config.read_fraction = 0.5;
        assert!(config.validate().is_err());

        config.write_fraction = 0.0;
        config.read_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_replica_sources() {
        assert!(with_endpoints(&[]).validate().is_err());

        let mut both = with_endpoints(&["a"]);
        both.replicas.statefulset = Some(StatefulSetConfig {
            name: "pg".into(),
            service: "svc".into(),
            namespace: "ns".into(),
            count: 2,
        });
        assert!(both.validate().is_err());

        both.replicas.endpoints.clear();
        assert!(both.validate().is_ok());
        assert_eq!(both.endpoints().unwrap().len(), 2);
    }

    #[test]
    fn test_validate_table_and_pool() {
        let mut config = with_endpoints(&["a"]);
        config.table = "records; DROP".into();
        assert!(config.validate().is_err());

        let mut config = with_endpoints(&["a"]);
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        environment().source(Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn test_load_endpoints_from_env() {
        let config = ServiceConfig::load_with_env(
            None,
            env(&[
                ("LEADERLESS__REPLICAS__ENDPOINTS", "pg-0,pg-1:6543,pg-2"),
                ("LEADERLESS__DATABASE__PASSWORD", "secret"),
                ("LEADERLESS__WRITE_FRACTION", "0.7"),
            ]),
        )
        .unwrap();

        assert_eq!(config.replicas.endpoints, vec!["pg-0", "pg-1:6543", "pg-2"]);
        assert_eq!(config.database.password, "secret");
        assert_eq!(config.write_fraction, 0.7);
        assert!(config.validate().is_ok());
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[1].port, 6543);
    }

    #[test]
    fn test_load_single_endpoint_from_env() {
        let config = ServiceConfig::load_with_env(
            None,
            env(&[("LEADERLESS__REPLICAS__ENDPOINTS", "pg-0")]),
        )
        .unwrap();
        assert_eq!(config.replicas.endpoints, vec!["pg-0"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
write_fraction = 0.6
read_fraction = 0.6
read_agreement = "quorum"
table = "people"

[database]
user = "app"
password = "secret"

[replicas]
endpoints = ["db-0", "db-1:6000", "db-2"]
"#
        )
        .unwrap();

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.write_fraction, 0.6);
        assert_eq!(config.read_agreement, ReadAgreement::Quorum);
        assert_eq!(config.table, "people");
        assert_eq!(config.database.user, "app");
        assert_eq!(config.database.port, 5432);
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[1].port, 6000);
        assert!(config.validate().is_ok());
        assert!(!format!("{:?}", config.database).contains("secret"));
    }
}
