//! The YAML configuration file.
//!
//! ```yaml
//! pidfile: /run/pfwd/pfwd.pid
//! loglevel: warn
//! logdir: /var/log/pfwd
//! logmode: "0640"
//! graceperiod: 5
//! forwards:
//!   "127.0.0.1:9001":
//!     dst: "127.0.0.1:9002"
//! ```

use crate::config::DEFAULT_GRACE_PERIOD;
use crate::engine::ForwardRule;
use log::LevelFilter;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Can't read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Can't decode config file {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Invalid address {address:?}: {reason}")]
    Address {
        address: String,
        reason: &'static str,
    },
    #[error("No forwards configured")]
    NoForwards,
}

#[derive(Debug)]
pub struct Settings {
    pub pidfile: PathBuf,
    pub log_level: LevelFilter,
    pub log_dir: PathBuf,
    pub log_mode: u32,
    pub grace_period: Duration,
    /// Sorted by listen address.
    pub forwards: Vec<ForwardRule>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    pidfile: PathBuf,
    loglevel: String,
    logdir: PathBuf,
    logmode: RawMode,
    graceperiod: Option<u64>,
    #[serde(default, deserialize_with = "unique_forwards")]
    forwards: BTreeMap<String, RawForward>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForward {
    dst: String,
}

/// Reads `forwards` as a map, rejecting a listen address that appears twice.
fn unique_forwards<'de, D>(deserializer: D) -> Result<BTreeMap<String, RawForward>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Forwards;

    impl<'de> Visitor<'de> for Forwards {
        type Value = BTreeMap<String, RawForward>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map from listen address to forward")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut forwards = BTreeMap::new();
            while let Some((listen, forward)) = map.next_entry::<String, RawForward>()? {
                match forwards.entry(listen) {
                    Entry::Occupied(e) => {
                        return Err(de::Error::custom(format_args!(
                            "duplicate listen address {:?}",
                            e.key()
                        )))
                    }
                    Entry::Vacant(e) => {
                        e.insert(forward);
                    }
                }
            }
            Ok(forwards)
        }
    }

    deserializer.deserialize_map(Forwards)
}

/// Permission bits, either as a number or as an octal string like `"0640"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMode {
    Bits(u32),
    Octal(String),
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parses and validates `text`; `origin` only appears in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawSettings = serde_yaml::from_str(text).map_err(|source| ConfigError::Decode {
            path: origin.to_owned(),
            source,
        })?;

        if raw.pidfile.as_os_str().is_empty() {
            return Err(invalid("pidfile", "must not be empty"));
        }
        if raw.logdir.as_os_str().is_empty() {
            return Err(invalid("logdir", "must not be empty"));
        }

        let log_level = parse_level(&raw.loglevel)?;
        let log_mode = match raw.logmode {
            RawMode::Bits(bits) => bits,
            RawMode::Octal(s) => {
                let digits = s.strip_prefix("0o").unwrap_or(&s);
                u32::from_str_radix(digits, 8)
                    .map_err(|e| invalid("logmode", format!("{:?} is not octal: {}", s, e)))?
            }
        };
        if log_mode > 0o777 {
            return Err(invalid(
                "logmode",
                format!("{:#o} is not a permission mode", log_mode),
            ));
        }

        let grace_period = match raw.graceperiod {
            None => DEFAULT_GRACE_PERIOD,
            Some(0) => return Err(invalid("graceperiod", "must be at least 1 second")),
            Some(seconds) => Duration::from_secs(seconds),
        };

        if raw.forwards.is_empty() {
            return Err(ConfigError::NoForwards);
        }
        let forwards = raw
            .forwards
            .into_iter()
            .map(|(listen, RawForward { dst })| {
                check_address(&listen)?;
                check_address(&dst)?;
                Ok(ForwardRule {
                    listen,
                    destination: dst,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            pidfile: raw.pidfile,
            log_level,
            log_dir: raw.logdir,
            log_mode,
            grace_period,
            forwards,
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, ConfigError> {
    Ok(match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" | "fatal" | "panic" => LevelFilter::Error,
        other => {
            return Err(invalid(
                "loglevel",
                format!(
                    "{:?} is not one of trace, debug, info, warn, error, fatal, panic",
                    other
                ),
            ))
        }
    })
}

/// Checks for `host:port`, with IPv6 hosts in brackets.
fn check_address(address: &str) -> Result<(), ConfigError> {
    let fail = |reason| ConfigError::Address {
        address: address.to_string(),
        reason,
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(|| fail("missing port"))?;
    if host.is_empty() {
        return Err(fail("missing host"));
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(fail("IPv6 hosts must be in brackets"));
    }
    port.parse::<u16>().map_err(|_| fail("invalid port"))?;
    Ok(())
}
