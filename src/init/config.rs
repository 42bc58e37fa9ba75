// SPDX-License-Identifier: Apache-2.0

//! Configuration files.
//!
//! `--config` names a file or a directory of files. Each file is JSON with
//! `#` comment lines and `$VAR` environment references; files are merged in
//! name order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Format, Json};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::exporters::lumberjack::ServerAddr;

const CONFIG_FILE_SIZE_LIMIT: u64 = 10 << 20;
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 15;
const DEFAULT_DEAD_TIME: &str = "24h";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} size {size} exceeds limit of {limit} bytes")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("{0} already defined as {1:?} in a previous config file")]
    Conflict(&'static str, String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One config file as written.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub network: NetworkSection,
    pub files: Vec<FileGroupSection>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub servers: Vec<String>,
    #[serde(rename = "ssl certificate")]
    pub ssl_certificate: Option<String>,
    #[serde(rename = "ssl key")]
    pub ssl_key: Option<String>,
    #[serde(rename = "ssl ca")]
    pub ssl_ca: Option<String>,
    /// Seconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileGroupSection {
    pub paths: Vec<String>,
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "dead time")]
    pub dead_time: Option<String>,
}

/// Merged and validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub servers: Vec<String>,
    pub ssl_certificate: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub ssl_ca: Option<PathBuf>,
    pub timeout: Duration,
    pub files: Vec<FileGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileGroup {
    pub paths: Vec<String>,
    pub fields: BTreeMap<String, String>,
    pub dead_time: Duration,
}

/// Load every config file under `path` and merge them.
pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
    let mut merged = ConfigFile::default();
    for file in discover_configs(path)? {
        if let Some(config) = load_file(&file)? {
            merge(&mut merged, config)?;
        }
    }
    finalize(merged)
}

/// The file itself, or the regular files of a directory in name order.
pub fn discover_configs(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::metadata(path).map_err(io_err)?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.path().is_file() {
            files.push(entry.path());
        } else {
            debug!(path = %entry.path().display(), "Skipping non-file config entry.");
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one config file. Empty files yield `None`.
pub fn load_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = fs::metadata(path).map_err(io_err)?.len();
    if size > CONFIG_FILE_SIZE_LIMIT {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: CONFIG_FILE_SIZE_LIMIT,
        });
    }
    if size == 0 {
        warn!(path = %path.display(), "Config file is empty, skipping.");
        return Ok(None);
    }

    let raw = fs::read_to_string(path).map_err(io_err)?;
    let text = expand_env(&strip_comments(&raw));
    if text.trim().is_empty() {
        warn!(path = %path.display(), "Config file has no content, skipping.");
        return Ok(None);
    }

    Figment::from(Json::string(&text))
        .extract::<ConfigFile>()
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
}

/// Drop carriage returns and lines whose first non-blank character is `#`.
pub fn strip_comments(data: &str) -> String {
    data.replace('\r', "")
        .split('\n')
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

static ENV_REF: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)"));

/// Replace `$VAR` and `${VAR}` with the variable's value, or nothing if unset.
pub fn expand_env(data: &str) -> String {
    let Ok(re) = ENV_REF.as_ref() else {
        return data.to_string();
    };
    re.replace_all(data, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}

/// Append servers and file groups from `from`. TLS files and the timeout may
/// only be set once across all files.
pub fn merge(to: &mut ConfigFile, from: ConfigFile) -> Result<(), ConfigError> {
    to.network.servers.extend(from.network.servers);
    to.files.extend(from.files);

    merge_once("ssl certificate", &mut to.network.ssl_certificate, from.network.ssl_certificate)?;
    merge_once("ssl key", &mut to.network.ssl_key, from.network.ssl_key)?;
    merge_once("ssl ca", &mut to.network.ssl_ca, from.network.ssl_ca)?;

    match (to.network.timeout, from.network.timeout) {
        (Some(prev), Some(_)) => return Err(ConfigError::Conflict("timeout", prev.to_string())),
        (None, Some(t)) => to.network.timeout = Some(t),
        _ => {}
    }
    Ok(())
}

fn merge_once(
    name: &'static str,
    to: &mut Option<String>,
    from: Option<String>,
) -> Result<(), ConfigError> {
    let Some(value) = from.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    match to {
        Some(prev) if !prev.is_empty() => Err(ConfigError::Conflict(name, prev.clone())),
        _ => {
            *to = Some(value);
            Ok(())
        }
    }
}

/// Apply defaults and validate.
pub fn finalize(config: ConfigFile) -> Result<AgentConfig, ConfigError> {
    let network = config.network;
    if network.servers.is_empty() {
        return Err(ConfigError::Invalid("no servers defined in network section".into()));
    }
    for server in &network.servers {
        server
            .parse::<ServerAddr>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty()).map(PathBuf::from);
    let ssl_certificate = non_empty(network.ssl_certificate);
    let ssl_key = non_empty(network.ssl_key);
    if ssl_certificate.is_some() != ssl_key.is_some() {
        return Err(ConfigError::Invalid(
            "ssl certificate and ssl key must be set together".into(),
        ));
    }

    let timeout = match network.timeout {
        Some(0) | None => Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        Some(secs) => Duration::from_secs(secs),
    };

    let files = config
        .files
        .into_iter()
        .enumerate()
        .map(|(i, group)| {
            if group.paths.is_empty() {
                return Err(ConfigError::Invalid(format!("file group {} has no paths", i)));
            }
            let dead_time = group
                .dead_time
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DEAD_TIME.to_string());
            let dead_time = humantime::parse_duration(&dead_time).map_err(|e| {
                ConfigError::Invalid(format!("invalid dead time {:?}: {}", dead_time, e))
            })?;
            Ok(FileGroup {
                paths: group.paths,
                fields: group.fields,
                dead_time,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AgentConfig {
        servers: network.servers,
        ssl_certificate,
        ssl_key,
        ssl_ca: non_empty(network.ssl_ca),
        timeout,
        files,
    })
}
