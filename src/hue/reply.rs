//! Classification of inbound payloads.
//!
//! The v1 bridge API returns structurally different JSON from the same
//! endpoints depending on context and carries no type tag, so every reply is
//! decoded into [`DiscoveryReply`] exactly once, at this boundary. Downstream
//! code matches on the variant instead of probing fields.

use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::hue::api::{DiscoveryCandidate, FullState, HueError};

#[derive(Debug)]
pub enum DiscoveryReply {
    /// N-UPnP broadcast discovery: `[{"internalipaddress": .., "id": ..}]`
    Discovery(Vec<DiscoveryCandidate>),
    /// `[{"error": {..}}]` — on an unauthenticated probe this means "valid
    /// bridge, no username yet", not a failure
    Errors(Vec<HueError>),
    /// `[{"success": {..}}]` — auth grants and state-change echoes
    Successes(Vec<Map<String, Value>>),
    /// Full bridge dump from `GET /api/<username>`
    FullState(Box<FullState>),
}

/// Decode a raw reply into its [`DiscoveryReply`] shape.
///
/// Error entries take precedence over anything else in the same array, per
/// the bridge's own convention. An unrecognizable payload is rejected whole;
/// no partial state is applied from it.
pub fn classify(value: Value) -> ApiResult<DiscoveryReply> {
    match value {
        Value::Array(items) => classify_array(items),
        Value::Object(_) => {
            let state = serde_json::from_value::<FullState>(value)?;
            Ok(DiscoveryReply::FullState(Box::new(state)))
        }
        other => Err(ApiError::UnrecognizedReply(other)),
    }
}

fn classify_array(items: Vec<Value>) -> ApiResult<DiscoveryReply> {
    let errors: Vec<HueError> = items
        .iter()
        .filter_map(|item| item.get("error"))
        .filter_map(|err| serde_json::from_value(err.clone()).ok())
        .collect();
    if !errors.is_empty() {
        return Ok(DiscoveryReply::Errors(errors));
    }

    let successes: Vec<Map<String, Value>> = items
        .iter()
        .filter_map(|item| item.get("success"))
        .filter_map(Value::as_object)
        .cloned()
        .collect();
    if !successes.is_empty() {
        return Ok(DiscoveryReply::Successes(successes));
    }

    let value = Value::Array(items);
    match serde_json::from_value(value.clone()) {
        Ok(candidates) => Ok(DiscoveryReply::Discovery(candidates)),
        Err(_) => Err(ApiError::UnrecognizedReply(value)),
    }
}

/// The kinds of entries a bridge mixes into its untagged payload maps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateKind {
    Device,
    Schedule,
    Group,
    ScanState,
    NameChange,
}

impl UpdateKind {
    /// Type an entry by which required fields it carries.
    #[must_use]
    pub fn classify(object: &Map<String, Value>) -> Self {
        let has_str = |key: &str| object.get(key).is_some_and(Value::is_string);

        if has_str("name") && has_str("uniqueid") && has_str("modelid") {
            Self::Device
        } else if has_str("name") && has_str("description") && has_str("time") {
            Self::Schedule
        } else if has_str("name")
            && object.get("lights").is_some_and(Value::is_array)
            && has_str("type")
            && object.contains_key("action")
        {
            Self::Group
        } else if object.contains_key("lastscan") {
            Self::ScanState
        } else {
            Self::NameChange
        }
    }
}

/// Extract a granted username from a batch of success entries, if present.
#[must_use]
pub fn username_from_successes(successes: &[Map<String, Value>]) -> Option<String> {
    successes
        .iter()
        .filter_map(|s| s.get("username"))
        .find_map(Value::as_str)
        .map(ToOwned::to_owned)
}

/// One `/lights/<index>/state/<key>` echo from a state-change success array.
#[derive(Clone, Debug, PartialEq)]
pub struct LightStateEcho {
    pub index: u32,
    pub key: String,
    pub value: Value,
}

/// Parse the per-key echoes the bridge sends back after a state PUT.
#[must_use]
pub fn light_state_echoes(successes: &[Map<String, Value>]) -> Vec<LightStateEcho> {
    let mut echoes = vec![];
    for success in successes {
        for (address, value) in success {
            let parts: Vec<&str> = address.split('/').collect();
            // "/lights/<index>/state/<key>" splits into 5 with a leading ""
            if parts.len() == 5 && parts[1] == "lights" && parts[3] == "state" {
                if let Ok(index) = parts[2].parse() {
                    echoes.push(LightStateEcho {
                        index,
                        key: parts[4].to_string(),
                        value: value.clone(),
                    });
                }
            }
        }
    }
    echoes
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn discovery_array_classifies() {
        let reply = classify(json!([
            { "internalipaddress": "192.168.1.10", "id": "001788FFFE09A206" },
            { "internalipaddress": "192.168.1.11", "id": "001788fffe09b307" }
        ]))
        .unwrap();

        let DiscoveryReply::Discovery(candidates) = reply else {
            panic!("expected discovery array");
        };
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].internal_ip_address, "192.168.1.10");
    }

    #[test]
    fn error_takes_precedence_over_success() {
        // some endpoints mix success and error entries in one array
        let reply = classify(json!([
            { "success": { "username": "abc" } },
            { "error": { "type": 1, "address": "/", "description": "unauthorized user" } }
        ]))
        .unwrap();
        assert!(matches!(reply, DiscoveryReply::Errors(errs) if errs.len() == 1));
    }

    #[test]
    fn auth_grant_classifies_as_success() {
        let reply = classify(json!([
            { "success": { "username": "83b7780291a6ceffbe0bd049104df" } }
        ]))
        .unwrap();
        let DiscoveryReply::Successes(successes) = reply else {
            panic!("expected successes");
        };
        assert_eq!(
            username_from_successes(&successes).as_deref(),
            Some("83b7780291a6ceffbe0bd049104df")
        );
    }

    #[test]
    fn full_state_object_classifies() {
        let reply = classify(json!({
            "config": { "bridgeid": "AABBCCDDEEFF0011" },
            "lights": {},
            "groups": {},
            "schedules": {}
        }))
        .unwrap();
        assert!(matches!(reply, DiscoveryReply::FullState(_)));
    }

    #[test]
    fn scalar_payload_is_rejected() {
        assert!(classify(json!("nonsense")).is_err());
    }

    #[test]
    fn malformed_object_is_rejected_whole() {
        // an object without config/lights is not a valid full state
        assert!(classify(json!({ "lights": {} })).is_err());
    }

    #[test]
    fn update_kinds_classify_by_field_shape() {
        let device = json!({
            "name": "Hue color lamp 1",
            "uniqueid": "00:17:88:01:10:3e:3a:dc-0b",
            "modelid": "LCT015"
        });
        let schedule = json!({
            "name": "heimdall_timeout_3",
            "description": "timeout",
            "time": "PT01:00:00"
        });
        let group = json!({
            "name": "Living room",
            "lights": ["1", "2"],
            "type": "Room",
            "action": { "on": true }
        });
        let scan = json!({ "lastscan": "2016-02-14T10:27:42" });
        let rename = json!({ "name": "Desk lamp" });

        let kind = |v: &Value| UpdateKind::classify(v.as_object().unwrap());
        assert_eq!(kind(&device), UpdateKind::Device);
        assert_eq!(kind(&schedule), UpdateKind::Schedule);
        assert_eq!(kind(&group), UpdateKind::Group);
        assert_eq!(kind(&scan), UpdateKind::ScanState);
        assert_eq!(kind(&rename), UpdateKind::NameChange);
    }

    #[test]
    fn state_echo_addresses_parse() {
        let successes = vec![
            json!({ "/lights/3/state/bri": 200 })
                .as_object()
                .unwrap()
                .clone(),
            json!({ "/lights/3/state/on": true })
                .as_object()
                .unwrap()
                .clone(),
        ];
        let echoes = light_state_echoes(&successes);
        assert_eq!(echoes.len(), 2);
        assert_eq!(echoes[0].index, 3);
        assert_eq!(echoes[0].key, "bri");
        assert_eq!(echoes[1].value, json!(true));
    }
}
