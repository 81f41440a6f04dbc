use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::hue::api::{ApiCommand, ApiSchedule, ScheduleBody};

/// The command a schedule executes when it fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HueCommand {
    pub address: String,
    pub method: String,
    pub body: Value,
}

/// A bridge-side timer resource. Schedules live on the bridge and fire even
/// when no application is connected; with `autodelete` off they must be
/// deleted explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub command: HueCommand,
    pub time: String,
    pub localtime: String,
    pub created: String,
    pub enabled: bool,
    pub autodelete: bool,
}

impl Schedule {
    #[must_use]
    pub fn from_api(index: u32, api: &ApiSchedule) -> Self {
        Self {
            index,
            name: api.name.clone(),
            description: api.description.clone(),
            command: HueCommand {
                address: api.command.address.clone(),
                method: api.command.method.clone(),
                body: api.command.body.clone(),
            },
            time: api.time.clone(),
            localtime: api.localtime.clone(),
            created: api.created.clone(),
            enabled: api.status == "enabled",
            autodelete: api.autodelete,
        }
    }
}

/// Name given to the idle-timeout schedule guarding a light.
#[must_use]
pub fn idle_timeout_name(app_name: &str, light_index: u32) -> String {
    format!("{app_name}_timeout_{light_index}")
}

/// POST body for a new idle-timeout schedule: turn the light off after
/// `minutes` of no traffic.
#[must_use]
pub fn idle_timeout_body(
    app_name: &str,
    username: &str,
    light_index: u32,
    minutes: u32,
) -> ScheduleBody {
    ScheduleBody {
        name: Some(idle_timeout_name(app_name, light_index)),
        command: Some(ApiCommand {
            address: format!("/api/{username}/lights/{light_index}/state"),
            method: "PUT".to_string(),
            body: json!({ "on": false }),
        }),
        localtime: Some(minutes_to_timeout(minutes)),
        status: None,
        autodelete: Some(false),
    }
}

/// PUT body adjusting an existing idle-timeout schedule.
#[must_use]
pub fn idle_timeout_update(enable: bool, minutes: u32) -> ScheduleBody {
    ScheduleBody {
        localtime: Some(minutes_to_timeout(minutes)),
        status: Some(if enable { "enabled" } else { "disabled" }.to_string()),
        ..ScheduleBody::default()
    }
}

/// Encode a timeout in minutes as the bridge's `PTHH:MM:SS` duration string.
///
/// Values above one subtract a minute before splitting into hours and
/// minutes, tracking how bridge firmware has been observed to interpret the
/// duration field: 90 minutes encodes as `PT01:29:00`. Do not correct this.
#[must_use]
pub fn minutes_to_timeout(minutes: u32) -> String {
    if minutes == 0 {
        return "PT00:00:00".to_string();
    }
    if minutes == 1 {
        return "PT00:01:00".to_string();
    }
    let total = minutes - 1;
    format!("PT{:02}:{:02}:00", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_encoding_vectors() {
        assert_eq!(minutes_to_timeout(0), "PT00:00:00");
        assert_eq!(minutes_to_timeout(1), "PT00:01:00");
        assert_eq!(minutes_to_timeout(61), "PT01:00:00");
        assert_eq!(minutes_to_timeout(90), "PT01:29:00");
    }

    #[test]
    fn two_minutes_encodes_as_one() {
        assert_eq!(minutes_to_timeout(2), "PT00:01:00");
    }

    #[test]
    fn idle_timeout_body_targets_the_light() {
        let body = idle_timeout_body("heimdall", "user1", 3, 120);
        assert_eq!(body.name.as_deref(), Some("heimdall_timeout_3"));
        let command = body.command.unwrap();
        assert_eq!(command.address, "/api/user1/lights/3/state");
        assert_eq!(command.method, "PUT");
        assert_eq!(command.body, json!({ "on": false }));
        assert_eq!(body.localtime.as_deref(), Some("PT01:59:00"));
        assert_eq!(body.autodelete, Some(false));
    }

    #[test]
    fn idle_timeout_update_flips_status() {
        let enabled = idle_timeout_update(true, 61);
        assert_eq!(enabled.status.as_deref(), Some("enabled"));
        assert_eq!(enabled.localtime.as_deref(), Some("PT01:00:00"));

        let disabled = idle_timeout_update(false, 61);
        assert_eq!(disabled.status.as_deref(), Some("disabled"));
    }

    #[test]
    fn schedule_from_api_maps_status_string() {
        let api: ApiSchedule = serde_json::from_value(serde_json::json!({
            "name": "heimdall_timeout_3",
            "description": "",
            "command": {
                "address": "/api/user1/lights/3/state",
                "method": "PUT",
                "body": { "on": false }
            },
            "time": "PT01:59:00",
            "localtime": "PT01:59:00",
            "created": "2019-06-01T10:00:00",
            "status": "enabled",
            "autodelete": false
        }))
        .unwrap();
        let schedule = Schedule::from_api(4, &api);
        assert!(schedule.enabled);
        assert_eq!(schedule.index, 4);
        assert_eq!(schedule.command.method, "PUT");
    }
}
