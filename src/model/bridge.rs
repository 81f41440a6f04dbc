use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hue::api::{ApiLight, ApiSchedule, BridgeConfigInfo};
use crate::hue::reply::UpdateKind;
use crate::hue::normalize_bridge_id;
use crate::model::group::Group;
use crate::model::light::LightMetadata;
use crate::model::schedule::Schedule;

/// Where a bridge stands in the discovery routine.
///
/// Phases only move forward, except for the single allowed loop-back from
/// `TestingConnectionInfo` to `LookingForUsername` when a credentials check
/// fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum DiscoveryPhase {
    #[default]
    LookingForIp,
    LookingForUsername,
    TestingConnectionInfo,
    Connected,
}

/// Everything known about one physical Hue bridge.
///
/// `id` is the canonical key once known; before that, `ip` correlates
/// observations (the IP always arrives first). Records are value types:
/// callers clone, mutate, and hand the whole record back to the registry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BridgeRecord {
    /// The bridge's own hardware id, lowercase, authoritative once known.
    pub id: String,
    /// Current network address; may change under DHCP.
    pub ip: String,
    /// Auth token granted by the bridge; empty until acquired.
    pub username: String,
    /// User-assigned display name, auto-generated default if unset.
    pub custom_name: String,
    /// Name the bridge reports for itself; usually a factory default.
    pub name: String,
    /// Reported API version.
    pub api: String,
    pub macaddress: String,
    pub phase: DiscoveryPhase,
    pub lights: HashMap<String, LightMetadata>,
    pub schedules: Vec<Schedule>,
    pub groups: Vec<Group>,
}

impl BridgeRecord {
    /// Stub for an address observed without any further detail (manual entry
    /// or an SSDP announcement with no usable id line).
    #[must_use]
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            phase: DiscoveryPhase::LookingForUsername,
            ..Self::default()
        }
    }

    /// The phase implied by which identity fields are populated. Used when
    /// reviving persisted records, which never resume as `Connected`.
    #[must_use]
    pub fn implied_phase(&self) -> DiscoveryPhase {
        if self.ip.is_empty() {
            DiscoveryPhase::LookingForIp
        } else if self.username.is_empty() {
            DiscoveryPhase::LookingForUsername
        } else {
            DiscoveryPhase::TestingConnectionInfo
        }
    }

    /// Fold the `config` section of a full-state dump into this record.
    pub fn apply_config(&mut self, config: &BridgeConfigInfo) {
        self.id = normalize_bridge_id(&config.bridge_id);
        self.name = config.name.clone();
        self.api = config.api_version.clone();
        if !config.mac.is_empty() {
            self.macaddress = config.mac.clone();
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.custom_name.is_empty() {
            &self.name
        } else {
            &self.custom_name
        }
    }
}

/// Walk the `lights` section of a full-state dump. Entries that fail the
/// device-shape check or don't parse are skipped; the rest still land.
#[must_use]
pub fn lights_from_map(lights: &Map<String, Value>) -> HashMap<String, LightMetadata> {
    let mut result = HashMap::new();
    for (key, value) in lights {
        let Some(object) = value.as_object() else {
            continue;
        };
        if UpdateKind::classify(object) != UpdateKind::Device {
            log::debug!("Skipping non-device entry under lights[{key}]");
            continue;
        }
        let Ok(index) = key.parse::<u32>() else {
            continue;
        };
        match serde_json::from_value::<ApiLight>(value.clone()) {
            Ok(api) => {
                let light = LightMetadata::from_api(index, &api);
                result.insert(light.unique_id.clone(), light);
            }
            Err(err) => log::debug!("Skipping malformed light {key}: {err}"),
        }
    }
    result
}

/// Walk the `schedules` section of a full-state dump, same skip rules.
#[must_use]
pub fn schedules_from_map(schedules: &Map<String, Value>) -> Vec<Schedule> {
    let mut result = vec![];
    for (key, value) in schedules {
        let Some(object) = value.as_object() else {
            continue;
        };
        if UpdateKind::classify(object) != UpdateKind::Schedule {
            log::debug!("Skipping non-schedule entry under schedules[{key}]");
            continue;
        }
        let Ok(index) = key.parse::<u32>() else {
            continue;
        };
        match serde_json::from_value::<ApiSchedule>(value.clone()) {
            Ok(api) => result.push(Schedule::from_api(index, &api)),
            Err(err) => log::debug!("Skipping malformed schedule {key}: {err}"),
        }
    }
    result
}

/// On-disk form of a bridge record. Field spelling (`IP`, `customName`)
/// matches the persisted layout from day one, so existing state files keep
/// loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedBridge {
    pub id: String,
    #[serde(rename = "IP")]
    pub ip: String,
    pub username: String,
    #[serde(rename = "customName", default)]
    pub custom_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub api: String,
    #[serde(default)]
    pub macaddress: String,
    #[serde(default)]
    pub lights: Vec<PersistedLight>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedLight {
    #[serde(rename = "uniqueid")]
    pub unique_id: String,
    pub index: u32,
    pub name: String,
    #[serde(rename = "swversion", default)]
    pub software_version: String,
}

impl From<&BridgeRecord> for PersistedBridge {
    fn from(bridge: &BridgeRecord) -> Self {
        let mut lights: Vec<PersistedLight> = bridge
            .lights
            .values()
            .map(|light| PersistedLight {
                unique_id: light.unique_id.clone(),
                index: light.index,
                name: light.name.clone(),
                software_version: light.software_version.clone(),
            })
            .collect();
        lights.sort_by_key(|light| light.index);

        Self {
            id: bridge.id.clone(),
            ip: bridge.ip.clone(),
            username: bridge.username.clone(),
            custom_name: bridge.custom_name.clone(),
            name: bridge.name.clone(),
            api: bridge.api.clone(),
            macaddress: bridge.macaddress.clone(),
            lights,
        }
    }
}

impl PersistedBridge {
    /// Revive as an in-memory record. Credentials are not trusted until the
    /// discovery routine re-verifies them, so the phase is recomputed from
    /// the populated fields and is never `Connected`.
    #[must_use]
    pub fn into_record(self) -> BridgeRecord {
        let lights = self
            .lights
            .into_iter()
            .map(|light| {
                (
                    light.unique_id.clone(),
                    LightMetadata {
                        unique_id: light.unique_id,
                        index: light.index,
                        name: light.name,
                        software_version: light.software_version,
                        ..LightMetadata::default()
                    },
                )
            })
            .collect();

        let mut record = BridgeRecord {
            id: normalize_bridge_id(&self.id),
            ip: self.ip,
            username: self.username,
            custom_name: self.custom_name,
            name: self.name,
            api: self.api,
            macaddress: self.macaddress,
            phase: DiscoveryPhase::LookingForIp,
            lights,
            schedules: vec![],
            groups: vec![],
        };
        record.phase = record.implied_phase();
        record
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn persisted_round_trip_distrusts_credentials() {
        let mut bridge = BridgeRecord::from_ip("192.168.1.10");
        bridge.id = "001788fffe09a206".to_string();
        bridge.username = "user1".to_string();
        bridge.custom_name = "Bridge 1".to_string();
        bridge.phase = DiscoveryPhase::Connected;

        let persisted = PersistedBridge::from(&bridge);
        let revived = persisted.into_record();

        assert_eq!(revived.id, bridge.id);
        assert_eq!(revived.ip, bridge.ip);
        assert_eq!(revived.username, bridge.username);
        assert_eq!(revived.phase, DiscoveryPhase::TestingConnectionInfo);
    }

    #[test]
    fn persisted_fields_keep_legacy_spelling() {
        let persisted = PersistedBridge {
            id: "001788fffe09a206".to_string(),
            ip: "192.168.1.10".to_string(),
            username: "user1".to_string(),
            custom_name: "Bridge 1".to_string(),
            ..PersistedBridge::default()
        };
        let value = serde_json::to_value(&persisted).unwrap();
        assert_eq!(value["IP"], json!("192.168.1.10"));
        assert_eq!(value["customName"], json!("Bridge 1"));
    }

    #[test]
    fn implied_phase_tracks_known_fields() {
        let mut bridge = BridgeRecord::default();
        assert_eq!(bridge.implied_phase(), DiscoveryPhase::LookingForIp);

        bridge.ip = "192.168.1.10".to_string();
        assert_eq!(bridge.implied_phase(), DiscoveryPhase::LookingForUsername);

        bridge.username = "user1".to_string();
        assert_eq!(bridge.implied_phase(), DiscoveryPhase::TestingConnectionInfo);
    }

    #[test]
    fn config_application_lowercases_id() {
        let config: BridgeConfigInfo = serde_json::from_value(json!({
            "bridgeid": "001788FFFE09A206",
            "name": "Philips hue",
            "apiversion": "1.24.0",
            "mac": "00:17:88:09:a2:06"
        }))
        .unwrap();
        let mut bridge = BridgeRecord::from_ip("192.168.1.10");
        bridge.apply_config(&config);
        assert_eq!(bridge.id, "001788fffe09a206");
        assert_eq!(bridge.api, "1.24.0");
    }

    #[test]
    fn malformed_light_entries_are_skipped_individually() {
        let lights = json!({
            "1": {
                "name": "Good lamp",
                "type": "Extended color light",
                "modelid": "LCT015",
                "uniqueid": "00:17:88:01:10:3e:3a:dc-0b",
                "state": { "on": true, "bri": 254 }
            },
            "2": { "name": "No uniqueid or modelid" },
            "3": "not even an object"
        });
        let parsed = lights_from_map(lights.as_object().unwrap());
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("00:17:88:01:10:3e:3a:dc-0b"));
    }
}
