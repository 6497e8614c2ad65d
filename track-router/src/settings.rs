use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// User-facing routing options. These are read every time a route is requested, so changing
/// them takes effect on the next edit.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// When false, routes are straight lines between anchors
    pub routing: bool,
    /// Name of the BRouter profile, without the `.brf` suffix
    pub profile: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            routing: true,
            profile: String::new(),
        }
    }
}

impl RoutingSettings {
    pub fn from_json(raw: &str) -> Result<RoutingSettings> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Clone, Debug)]
pub struct BRouterConfig {
    /// Base URL of the BRouter server, like `https://brouter.example.org`
    pub address: String,
    pub timeout: Duration,
}

impl BRouterConfig {
    pub fn new(address: impl Into<String>) -> BRouterConfig {
        BRouterConfig {
            address: address.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}
