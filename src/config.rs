use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Identity presented to bridges when pairing.
///
/// Philips requires a `devicetype` of the form `<app name>#<device name>` when
/// requesting a username.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct AppIdentity {
    pub name: String,
    pub device: String,
}

impl AppIdentity {
    #[must_use]
    pub fn devicetype(&self) -> String {
        format!("{}#{}", self.name, self.device)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DiscoveryConfig {
    pub state_file: Utf8PathBuf,
    pub nupnp_url: Url,
    pub poll_interval_ms: u64,
    pub nupnp_interval_ms: u64,
    pub startup_window_secs: u64,
    pub sync_interval_ms: u64,
    pub idle_timeout_minutes: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct AppConfig {
    pub app: AppIdentity,
    pub discovery: DiscoveryConfig,
}

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("app.name", "heimdall")?
        .set_default("app.device", "heimdall device")?
        .set_default("discovery.state_file", "bridges.json")?
        .set_default("discovery.nupnp_url", "https://discovery.meethue.com/")?
        .set_default("discovery.poll_interval_ms", 2500)?
        .set_default("discovery.nupnp_interval_ms", 8000)?
        .set_default("discovery.startup_window_secs", 120)?
        .set_default("discovery.sync_interval_ms", 15000)?
        .set_default("discovery.idle_timeout_minutes", 120)?
        .add_source(config::File::with_name(filename.as_str()).required(false))
        .build()?;

    settings.try_deserialize()
}
