use serde::{Deserialize, Serialize};

use crate::hue::api::{ApiGroup, ApiGroupType};

/// A bridge-side room or zone grouping of light indices.
///
/// `id` is minted locally (see [`next_group_id`]); `bridge_index` is the
/// group number the bridge itself uses in its REST paths.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub bridge_index: u32,
    pub name: String,
    pub lights: Vec<String>,
    pub is_room: bool,
}

impl Group {
    #[must_use]
    pub fn from_api(id: u64, bridge_index: u32, api: &ApiGroup) -> Self {
        Self {
            id,
            bridge_index,
            name: api.name.clone(),
            lights: api.lights.clone(),
            is_room: api.group_type == ApiGroupType::Room,
        }
    }
}

/// Mint an id for a group first observed from a bridge: one less than the
/// minimum id currently known, seeded from `u64::MAX`.
///
/// Counting down from the top keeps bridge-originated ids out of the range
/// where locally-created groups count up from zero. This is a documented
/// heuristic, not a proven guarantee; callers must record each minted id
/// before minting the next one.
#[must_use]
pub fn next_group_id<'a>(known: impl IntoIterator<Item = &'a u64>) -> u64 {
    known
        .into_iter()
        .copied()
        .min()
        .unwrap_or(u64::MAX)
        .wrapping_sub(1)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn first_id_lands_in_the_upper_half() {
        assert_eq!(next_group_id([]), u64::MAX - 1);
    }

    #[test]
    fn repeated_minting_never_collides() {
        let mut known: HashSet<u64> = [500u64, 1000, u64::MAX - 4].into();
        for _ in 0..64 {
            let id = next_group_id(known.iter());
            assert!(!known.contains(&id));
            known.insert(id);
        }
    }

    #[test]
    fn minted_below_existing_minimum() {
        let known = [500u64, 1000];
        assert_eq!(next_group_id(known.iter()), 499);
    }

    #[test]
    fn group_from_api_carries_room_flag() {
        let api: ApiGroup = serde_json::from_value(serde_json::json!({
            "name": "Living room",
            "lights": ["1", "4"],
            "type": "Room",
            "action": { "on": false }
        }))
        .unwrap();
        let group = Group::from_api(42, 1, &api);
        assert!(group.is_room);
        assert_eq!(group.lights, vec!["1", "4"]);
    }
}
