use std::ops::RangeInclusive;
use std::time::Duration;

pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pfwd/pfwd.yaml";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub const ACCEPT_BACKOFF_SECS: RangeInclusive<u8> = 1..=64;

pub const LOG_FILE_NAME: &str = "app.log";

/// How long process exit waits on blocking work, such as a stuck name lookup.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);
