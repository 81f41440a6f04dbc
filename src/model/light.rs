use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hue::api::ApiLight;
use crate::hue::color::{self, Rgb};

/// Feature classes of Hue bulbs, from the `type` field of a light entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum HueType {
    #[default]
    Extended,
    Ambient,
    Color,
    White,
}

impl HueType {
    #[must_use]
    pub fn from_api(s: &str) -> Option<Self> {
        match s {
            "Extended color light" => Some(Self::Extended),
            "Color temperature light" => Some(Self::Ambient),
            "Color light" => Some(Self::Color),
            "Dimmable light" => Some(Self::White),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_api(self) -> &'static str {
        match self {
            Self::Extended => "Extended color light",
            Self::Ambient => "Color temperature light",
            Self::Color => "Color light",
            Self::White => "Dimmable light",
        }
    }
}

/// The color mode a bulb reported with its last state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Xy,
    Hs,
    Ct,
    #[default]
    Dimmable,
}

impl ColorMode {
    #[must_use]
    pub fn from_api(mode: Option<&str>) -> Self {
        match mode {
            Some("xy") => Self::Xy,
            Some("hs" | "hsv") => Self::Hs,
            Some("ct") => Self::Ct,
            _ => Self::Dimmable,
        }
    }
}

/// Per-bulb metadata and last observed state, keyed by the bridge-assigned
/// unique id. Owned by its bridge record; updated wholesale on every poll.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LightMetadata {
    pub unique_id: String,
    pub index: u32,
    pub name: String,
    pub model_id: String,
    pub software_version: String,
    pub light_type: HueType,
    pub color_mode: ColorMode,
    pub is_on: bool,
    pub is_reachable: bool,
    /// Brightness in percent.
    pub brightness: f64,
    pub color: Rgb,
}

impl LightMetadata {
    #[must_use]
    pub fn from_api(index: u32, api: &ApiLight) -> Self {
        let state = &api.state;
        let bri = state.bri.unwrap_or(254);
        let color_mode = ColorMode::from_api(state.colormode.as_deref());

        let (color, color_mode) = match color_mode {
            ColorMode::Xy if state.xy.is_some() => {
                let [x, y] = state.xy.unwrap_or_default();
                (color::xy_to_rgb(x, y, bri), ColorMode::Xy)
            }
            ColorMode::Hs | ColorMode::Xy => (
                color::hs_to_rgb(state.hue.unwrap_or(0), state.sat.unwrap_or(0), bri),
                ColorMode::Hs,
            ),
            ColorMode::Ct => (color::mired_to_rgb(state.ct.unwrap_or(0)), ColorMode::Ct),
            ColorMode::Dimmable => {
                let level = f64::from(bri) / 254.0;
                (Rgb::new(level, level, level), ColorMode::Dimmable)
            }
        };

        Self {
            unique_id: api.unique_id.clone(),
            index,
            name: api.name.clone(),
            model_id: api.model_id.clone(),
            software_version: api.software_version.clone(),
            light_type: HueType::from_api(&api.light_type).unwrap_or_default(),
            color_mode,
            is_on: state.on,
            is_reachable: state.reachable,
            brightness: f64::from(bri) / 254.0 * 100.0,
            color,
        }
    }

    /// Fold one `/lights/<n>/state/<key>` success echo back into the stored
    /// state, so the record tracks a PUT without waiting for the next poll.
    /// Returns whether anything changed.
    pub fn apply_echo(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "on" => {
                let Some(on) = value.as_bool() else {
                    return false;
                };
                self.is_on = on;
            }
            "bri" => {
                let Some(bri) = value.as_f64() else {
                    return false;
                };
                let (h, s, _) = color::rgb_to_hsv(self.color);
                self.color = color::hsv_to_rgb(h, s, bri / 254.0);
                self.brightness = bri / 254.0 * 100.0;
            }
            "hue" => {
                let Some(hue) = value.as_f64() else {
                    return false;
                };
                let (_, s, v) = color::rgb_to_hsv(self.color);
                self.color = color::hsv_to_rgb(hue / 65535.0, s, v);
                self.color_mode = ColorMode::Hs;
            }
            "sat" => {
                let Some(sat) = value.as_f64() else {
                    return false;
                };
                let (h, _, v) = color::rgb_to_hsv(self.color);
                self.color = color::hsv_to_rgb(h, sat / 254.0, v);
                self.color_mode = ColorMode::Hs;
            }
            "ct" => {
                let Some(ct) = value.as_u64() else {
                    return false;
                };
                self.color = color::mired_to_rgb(u16::try_from(ct).unwrap_or(u16::MAX));
                self.color_mode = ColorMode::Ct;
            }
            "colormode" => {
                let Some(mode) = value.as_str() else {
                    return false;
                };
                self.color_mode = ColorMode::from_api(Some(mode));
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn api_light(state: serde_json::Value) -> ApiLight {
        serde_json::from_value(json!({
            "name": "Hue color lamp 7",
            "type": "Extended color light",
            "modelid": "LCT015",
            "manufacturername": "Philips",
            "uniqueid": "00:17:88:01:10:3e:3a:dc-0b",
            "swversion": "1.29.0_r21169",
            "state": state,
        }))
        .unwrap()
    }

    #[test]
    fn xy_mode_light_decodes_through_matrix() {
        let api = api_light(json!({
            "on": true,
            "bri": 254,
            "xy": [0.3127, 0.3290],
            "colormode": "xy",
            "reachable": true
        }));
        let light = LightMetadata::from_api(7, &api);

        assert_eq!(light.color_mode, ColorMode::Xy);
        assert!(light.color.red > 0.97);
        assert!(light.is_reachable);
        assert_eq!(light.index, 7);
    }

    #[test]
    fn hs_mode_light_uses_scaled_mapping() {
        let api = api_light(json!({
            "on": true,
            "bri": 254,
            "hue": 0,
            "sat": 254,
            "colormode": "hs"
        }));
        let light = LightMetadata::from_api(1, &api);

        assert_eq!(light.color_mode, ColorMode::Hs);
        assert_eq!(light.color.to_bytes(), [255, 0, 0]);
        assert!((light.brightness - 100.0).abs() < 0.01);
    }

    #[test]
    fn ct_mode_light_uses_black_body() {
        let api = api_light(json!({
            "on": true,
            "bri": 127,
            "ct": 500,
            "colormode": "ct"
        }));
        let light = LightMetadata::from_api(1, &api);

        assert_eq!(light.color_mode, ColorMode::Ct);
        assert!((light.color.red - 1.0).abs() < f64::EPSILON);
        assert!(light.color.blue < 0.4);
    }

    #[test]
    fn missing_colormode_falls_back_to_dimmable() {
        let api = api_light(json!({ "on": false, "bri": 127 }));
        let light = LightMetadata::from_api(1, &api);
        assert_eq!(light.color_mode, ColorMode::Dimmable);
        assert_eq!(light.color.to_bytes()[0], light.color.to_bytes()[2]);
    }

    #[test]
    fn state_echoes_fold_into_the_record() {
        let api = api_light(json!({
            "on": false,
            "bri": 254,
            "hue": 0,
            "sat": 254,
            "colormode": "hs"
        }));
        let mut light = LightMetadata::from_api(1, &api);

        assert!(light.apply_echo("on", &json!(true)));
        assert!(light.is_on);

        assert!(light.apply_echo("bri", &json!(127)));
        assert!((light.brightness - 50.0).abs() < 0.01);

        assert!(light.apply_echo("ct", &json!(500)));
        assert_eq!(light.color_mode, ColorMode::Ct);

        assert!(!light.apply_echo("effect", &json!("none")));
        assert!(!light.apply_echo("on", &json!("not-a-bool")));
    }

    #[test]
    fn hue_type_round_trips() {
        for typ in [
            HueType::Extended,
            HueType::Ambient,
            HueType::Color,
            HueType::White,
        ] {
            assert_eq!(HueType::from_api(typ.as_api()), Some(typ));
        }
        assert_eq!(HueType::from_api("On/Off plug-in unit"), None);
    }
}
