//! Environment-style configuration for the operations entry points.
//!
//! Every entry point loads its configuration before touching the network, so a
//! missing key is reported up front together with every other missing key.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::DEFAULT_UPLOAD_CONCURRENCY;

pub const SCALING_GROUP_NAME: &str = "SCALING_GROUP_NAME";
pub const CONSOLE_PORT: &str = "CONSOLE_PORT";
pub const CONSOLE_CREDENTIAL: &str = "CONSOLE_CREDENTIAL";
pub const BACKUP_BUCKET_NAME: &str = "BACKUP_BUCKET_NAME";
pub const SHARED_FS_MOUNT_PATH: &str = "SHARED_FS_MOUNT_PATH";
pub const BACKUP_DIRECTORIES: &str = "BACKUP_DIRECTORIES";
pub const DNS_ZONE_ID: &str = "DNS_ZONE_ID";
pub const DNS_RECORD_NAME: &str = "DNS_RECORD_NAME";

pub const BACKUP_CONCURRENCY: &str = "BACKUP_CONCURRENCY";
pub const BACKUP_STORAGE_CLASS: &str = "BACKUP_STORAGE_CLASS";
pub const CONSOLE_CONNECT_TIMEOUT_MS: &str = "CONSOLE_CONNECT_TIMEOUT_MS";
pub const CONSOLE_READ_TIMEOUT_MS: &str = "CONSOLE_READ_TIMEOUT_MS";
pub const CONSOLE_IDLE_TIMEOUT_MS: &str = "CONSOLE_IDLE_TIMEOUT_MS";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Archival tier the backup objects are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    #[default]
    Glacier,
    GlacierInstantRetrieval,
    DeepArchive,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Glacier => "GLACIER",
            StorageClass::GlacierInstantRetrieval => "GLACIER_IR",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GLACIER" => Ok(StorageClass::Glacier),
            "GLACIER_IR" => Ok(StorageClass::GlacierInstantRetrieval),
            "DEEP_ARCHIVE" => Ok(StorageClass::DeepArchive),
            other => Err(format!(
                "unsupported storage class '{}', expected GLACIER, GLACIER_IR or DEEP_ARCHIVE",
                other
            )),
        }
    }
}

/// Where to reach the game server's console and how patient to be with it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub scaling_group_name: String,
    pub port: u16,
    pub credential: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
}

// The credential must never reach a log line.
impl fmt::Debug for ConsoleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleConfig")
            .field("scaling_group_name", &self.scaling_group_name)
            .field("port", &self.port)
            .field("credential", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub console: ConsoleConfig,
    pub bucket_name: String,
    pub mount_path: PathBuf,
    pub directories: Vec<String>,
    pub concurrency: usize,
    pub storage_class: StorageClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsConfig {
    pub zone_id: String,
    pub record_name: String,
}

/// Collects values from a key lookup, remembering every missing key.
struct Reader<F> {
    lookup: F,
    missing: Vec<&'static str>,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
        }
    }

    fn required(&mut self, key: &'static str) -> String {
        match (self.lookup)(key).map(|v| v.trim().to_string()) {
            Some(value) if !value.is_empty() => value,
            _ => {
                self.missing.push(key);
                String::new()
            }
        }
    }

    /// Present but possibly empty.
    fn required_allow_empty(&mut self, key: &'static str) -> String {
        match (self.lookup)(key) {
            Some(value) => value,
            None => {
                self.missing.push(key);
                String::new()
            }
        }
    }

    fn optional(&self, key: &'static str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn check(&mut self) -> Result<(), ConfigError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(std::mem::take(&mut self.missing)))
        }
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

fn parse_millis<F>(
    reader: &Reader<F>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match reader.optional(key) {
        Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}

/// Splits a comma-separated directory list, dropping blank entries.
pub fn parse_directory_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_console<F>(reader: &mut Reader<F>) -> (String, String, String)
where
    F: Fn(&str) -> Option<String>,
{
    let group = reader.required(SCALING_GROUP_NAME);
    let port = reader.required(CONSOLE_PORT);
    let credential = reader.required(CONSOLE_CREDENTIAL);
    (group, port, credential)
}

fn build_console<F>(
    reader: &Reader<F>,
    (scaling_group_name, port, credential): (String, String, String),
) -> Result<ConsoleConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(ConsoleConfig {
        scaling_group_name,
        port: parse_value::<u16>(CONSOLE_PORT, &port)?,
        credential,
        connect_timeout: parse_millis(reader, CONSOLE_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT)?,
        read_timeout: parse_millis(reader, CONSOLE_READ_TIMEOUT_MS, DEFAULT_READ_TIMEOUT)?,
        idle_timeout: parse_millis(reader, CONSOLE_IDLE_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT)?,
    })
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = Reader::new(lookup);
        let raw = read_console(&mut reader);
        reader.check()?;
        build_console(&reader, raw)
    }
}

impl BackupConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = Reader::new(lookup);
        let console = read_console(&mut reader);
        let bucket_name = reader.required(BACKUP_BUCKET_NAME);
        let mount_path = reader.required(SHARED_FS_MOUNT_PATH);
        let directories = reader.required_allow_empty(BACKUP_DIRECTORIES);
        reader.check()?;

        let concurrency = match reader.optional(BACKUP_CONCURRENCY) {
            Some(raw) => parse_value::<usize>(BACKUP_CONCURRENCY, &raw)?,
            None => DEFAULT_UPLOAD_CONCURRENCY,
        };
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: BACKUP_CONCURRENCY,
                reason: "must be at least 1".to_string(),
            });
        }

        let storage_class = match reader.optional(BACKUP_STORAGE_CLASS) {
            Some(raw) => parse_value::<StorageClass>(BACKUP_STORAGE_CLASS, &raw)?,
            None => StorageClass::default(),
        };

        Ok(BackupConfig {
            console: build_console(&reader, console)?,
            bucket_name,
            mount_path: PathBuf::from(mount_path),
            directories: parse_directory_list(&directories),
            concurrency,
            storage_class,
        })
    }
}

impl DnsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = Reader::new(lookup);
        let zone_id = reader.required(DNS_ZONE_ID);
        let record_name = reader.required(DNS_RECORD_NAME);
        reader.check()?;

        Ok(DnsConfig {
            zone_id,
            record_name,
        })
    }
}
