//! Store configuration
//!
//! Limits are read from the environment, following the controller's
//! `EDGEWARD_*` variable convention:
//!
//! - `EDGEWARD_MAX_LOG_SIZE`
//! - `EDGEWARD_MAX_INFO_SIZE`
//! - `EDGEWARD_MAX_METRIC_SIZE`
//! - `EDGEWARD_MAX_REQUESTS_SIZE`
//! - `EDGEWARD_MAX_APP_LOGS_SIZE`
//! - `EDGEWARD_MAX_FLOW_MESSAGE_SIZE`
//!
//! All values are in bytes.

use std::env;
use tracing::warn;

use crate::storage::StreamKind;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

const DEFAULT_MAX_SIZE: usize = 10 * MB;

/// Maximum chunk size for each device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxSizes {
    pub max_log_size: usize,
    pub max_info_size: usize,
    pub max_metric_size: usize,
    pub max_requests_size: usize,
    pub max_app_logs_size: usize,
    pub max_flow_message_size: usize,
}

impl Default for MaxSizes {
    fn default() -> Self {
        Self {
            max_log_size: DEFAULT_MAX_SIZE,
            max_info_size: DEFAULT_MAX_SIZE,
            max_metric_size: DEFAULT_MAX_SIZE,
            max_requests_size: DEFAULT_MAX_SIZE,
            max_app_logs_size: DEFAULT_MAX_SIZE,
            max_flow_message_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl MaxSizes {
    /// Limit applying to a stream kind
    ///
    /// Received device certs share the info limit.
    pub fn for_kind(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Logs => self.max_log_size,
            StreamKind::Info | StreamKind::Certs => self.max_info_size,
            StreamKind::Metrics => self.max_metric_size,
            StreamKind::Requests => self.max_requests_size,
            StreamKind::FlowMessage => self.max_flow_message_size,
            StreamKind::AppLog(_) => self.max_app_logs_size,
        }
    }
}

/// Configuration for a device store
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub max_sizes: MaxSizes,
}

impl StoreConfig {
    /// Load from `EDGEWARD_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = MaxSizes::default();
        let size = |name: &str, default: usize| match lookup(name) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(variable = name, value = %raw, default, "Ignoring invalid size");
                default
            }),
        };

        Self {
            max_sizes: MaxSizes {
                max_log_size: size("EDGEWARD_MAX_LOG_SIZE", defaults.max_log_size),
                max_info_size: size("EDGEWARD_MAX_INFO_SIZE", defaults.max_info_size),
                max_metric_size: size("EDGEWARD_MAX_METRIC_SIZE", defaults.max_metric_size),
                max_requests_size: size("EDGEWARD_MAX_REQUESTS_SIZE", defaults.max_requests_size),
                max_app_logs_size: size("EDGEWARD_MAX_APP_LOGS_SIZE", defaults.max_app_logs_size),
                max_flow_message_size: size(
                    "EDGEWARD_MAX_FLOW_MESSAGE_SIZE",
                    defaults.max_flow_message_size,
                ),
            },
        }
    }
}
