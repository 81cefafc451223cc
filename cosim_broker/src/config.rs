//! Participant configuration.
//!
//! Mirrors §6's configuration enumeration as a plain `serde` struct, loadable from TOML by the
//! `cosim` binary's `runner` feature or built programmatically with a `typed-builder` builder --
//! the same pattern the teacher crate's root `boomerang` uses for its reactor builder API.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Per-federate flags, set at registration and consulted by the owning [`crate::core::Core`]
/// and its [`cosim_runtime::TimeCoordinator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederateFlags {
    /// Promoted to a pure dependent: never produces events, only observes.
    pub observer: bool,
    /// Promoted to a pure dependency: never depends on anyone else's time.
    pub source_only: bool,
    pub uninterruptible: bool,
    pub only_transmit_on_change: bool,
    pub only_update_on_change: bool,
    pub wait_for_current_time_update: bool,
    pub restrictive_time_policy: bool,
    pub realtime: bool,
    pub delay_init_entry: bool,
}

/// Verbosity for a participant's log sink. Carried in config only -- `cosim` does not install a
/// subscriber itself (see `tracing`/`tracing-subscriber` split in the crate docs); a host
/// application or the `runner` binary maps this to an `EnvFilter` directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Summary,
    Connections,
    Interfaces,
    Timing,
    Data,
    Trace,
}

/// Configuration for one [`crate::core::Core`].
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct CoreConfig {
    #[builder(setter(into))]
    pub name: String,
    /// Name of the parent broker to join, resolved through the process-wide
    /// [`cosim_transport::DIRECTORY`]. `None` is only valid for a Core standing in as its own
    /// root for single-Core test federations.
    #[builder(default, setter(strip_option, into))]
    pub parent: Option<String>,
    #[builder(default = 5_000)]
    pub timeout_ms: u64,
    #[builder(default = 1)]
    pub max_iteration_count: u16,
    #[builder(default)]
    pub log_level: LogLevel,
}

/// Configuration for one [`crate::broker::Broker`].
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct BrokerConfig {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default, setter(strip_option, into))]
    pub parent: Option<String>,
    /// Root-only: minimum federate count expected before init may complete. Informational here;
    /// the init handshake itself is driven by every known child reporting ready (§4.3).
    #[builder(default = 1)]
    pub min_federate_count: usize,
    #[builder(default = 0)]
    pub min_broker_count: usize,
    #[builder(default = 5_000)]
    pub timeout_ms: u64,
    #[builder(default)]
    pub log_level: LogLevel,
}

/// Per-federate registration info supplied to [`crate::core::CoreHandle::register_federate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederateInfo {
    pub name: String,
    pub flags: FederateFlags,
}

impl FederateInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: FederateFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: FederateFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_config_builder_has_sane_defaults() {
        let cfg = CoreConfig::builder().name("core_a").build();
        assert_eq!(cfg.name, "core_a");
        assert!(cfg.parent.is_none());
        assert_eq!(cfg.max_iteration_count, 1);
    }

    #[test]
    fn toml_round_trips() {
        let cfg = BrokerConfig::builder()
            .name("root")
            .min_federate_count(2usize)
            .build();
        let text = toml::to_string(&cfg).unwrap();
        let back: BrokerConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.name, "root");
        assert_eq!(back.min_federate_count, 2);
    }
}
