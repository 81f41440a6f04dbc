//! Wire types for the legacy (v1) Hue bridge API.
//!
//! These are decode-first: a discovery client has to accept whatever a bridge
//! of any firmware vintage sends, so most fields are optional or defaulted,
//! and payload collections are kept as raw JSON maps so a single malformed
//! entry can be skipped without discarding its siblings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HueError {
    #[serde(rename = "type")]
    pub typ: u32,
    pub address: String,
    pub description: String,
}

/// The success/error envelope used by every v1 mutation endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HueApiResult<T> {
    Success(T),
    Error(HueError),
}

/// Body for `POST /api`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub devicetype: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewUserReply {
    pub username: String,
}

/// One entry of the N-UPnP broadcast-discovery array.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DiscoveryCandidate {
    #[serde(rename = "internalipaddress")]
    pub internal_ip_address: String,
    pub id: String,
}

/// The slice of `config` a discovery client cares about.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfigInfo {
    #[serde(rename = "bridgeid")]
    pub bridge_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "apiversion", default)]
    pub api_version: String,
    #[serde(default)]
    pub mac: String,
}

/// An authenticated `GET /api/<username>` dump.
///
/// `lights`/`groups`/`schedules` entries stay untyped here; they are
/// classified and converted one at a time (see [`crate::hue::reply`]), so a
/// bad entry only loses itself.
#[derive(Clone, Debug, Deserialize)]
pub struct FullState {
    pub config: BridgeConfigInfo,
    pub lights: Map<String, Value>,
    #[serde(default)]
    pub groups: Map<String, Value>,
    #[serde(default)]
    pub schedules: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApiLightState {
    pub on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colormode: Option<String>,
    #[serde(default)]
    pub reachable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiLight {
    pub name: String,
    #[serde(rename = "type")]
    pub light_type: String,
    #[serde(rename = "modelid")]
    pub model_id: String,
    #[serde(rename = "manufacturername", default)]
    pub manufacturer_name: String,
    #[serde(rename = "uniqueid")]
    pub unique_id: String,
    #[serde(rename = "swversion", default)]
    pub software_version: String,
    pub state: ApiLightState,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub enum ApiGroupType {
    Entertainment,
    #[default]
    LightGroup,
    Room,
    Zone,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiGroup {
    pub name: String,
    pub lights: Vec<String>,
    #[serde(rename = "type", default)]
    pub group_type: ApiGroupType,
    #[serde(default)]
    pub action: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiCommand {
    pub address: String,
    pub method: String,
    pub body: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiSchedule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: ApiCommand,
    pub time: String,
    #[serde(default)]
    pub localtime: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub autodelete: bool,
}

/// PUT body for `/lights/<n>/state`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LightStateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitiontime: Option<u16>,
}

impl LightStateUpdate {
    /// Clamp every field to the ranges the bridge accepts: bri/sat 0..=254,
    /// ct 153..=500 mired. `hue` uses the full u16 range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.bri = self.bri.map(|v| v.min(254));
        self.sat = self.sat.map(|v| v.min(254));
        self.ct = self.ct.map(|v| v.clamp(153, 500));
        self
    }
}

/// POST/PUT body for `/groups`.
#[derive(Clone, Debug, Serialize)]
pub struct GroupBody {
    pub name: String,
    pub lights: Vec<String>,
    #[serde(rename = "type")]
    pub group_type: ApiGroupType,
}

/// POST/PUT body for `/schedules`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ScheduleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ApiCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autodelete: Option<bool>,
}
