use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::bridge::{BridgeRecord, DiscoveryPhase, PersistedBridge};
use crate::model::light::LightMetadata;

/// Aggregate discovery status, for status reporting and UI layers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OverallState {
    /// No usable address yet; waiting on N-UPnP and SSDP.
    FindingIpAddress,
    /// An address is known; waiting for the link button to grant a username.
    FindingDeviceUsername,
    /// Address and username known but not yet proven to work together.
    TestingFullConnection,
    /// At least one bridge is fully connected, others still pending.
    BridgeConnected,
    AllBridgesConnected,
}

/// The single owner of all bridge records.
///
/// Bridges live in exactly one of two sets: `found` (fully verified, keyed by
/// hardware id) or `not_found` (partially known, still being discovered).
/// All mutation goes through [`BridgeRegistry::add_or_update`], which
/// replaces the stored record wholesale; callers clone, modify, and hand the
/// record back.
#[derive(Clone, Debug, Default)]
pub struct BridgeRegistry {
    found: HashMap<String, BridgeRecord>,
    not_found: Vec<BridgeRecord>,
}

impl BridgeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn found(&self) -> &HashMap<String, BridgeRecord> {
        &self.found
    }

    #[must_use]
    pub fn not_found(&self) -> &[BridgeRecord] {
        &self.not_found
    }

    /// The single write path. A `Connected` record lands in the found set
    /// (displacing every not-found entry it correlates with, by id or IP);
    /// anything else upserts into the not-found set.
    ///
    /// Not-found entries are keyed by IP: before promotion the IP is the
    /// correlation key, and two entries sharing an id under different
    /// addresses legitimately coexist while a DHCP move is being resolved.
    pub fn add_or_update(&mut self, bridge: BridgeRecord) {
        if bridge.phase == DiscoveryPhase::Connected {
            assert!(
                !bridge.id.is_empty() && !bridge.ip.is_empty() && !bridge.username.is_empty(),
                "connected bridge must have id, IP and username"
            );
            self.not_found
                .retain(|b| b.id != bridge.id && b.ip != bridge.ip);
            self.found.insert(bridge.id.clone(), bridge);
            return;
        }

        let slot = self.not_found.iter_mut().find(|b| {
            if bridge.ip.is_empty() {
                !bridge.id.is_empty() && b.id == bridge.id
            } else {
                b.ip == bridge.ip
            }
        });
        match slot {
            Some(existing) => *existing = bridge,
            None => self.not_found.push(bridge),
        }
    }

    /// Remove a bridge from whichever set holds it. Returns whether anything
    /// was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let had_found = self.found.remove(id).is_some();
        let before = self.not_found.len();
        self.not_found.retain(|b| b.id != id);
        had_found || before != self.not_found.len()
    }

    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&BridgeRecord> {
        self.found
            .get(id)
            .or_else(|| self.not_found.iter().find(|b| b.id == id))
    }

    #[must_use]
    pub fn find_by_ip(&self, ip: &str) -> Option<&BridgeRecord> {
        self.found
            .values()
            .find(|b| b.ip == ip)
            .or_else(|| self.not_found.iter().find(|b| b.ip == ip))
    }

    /// Look up by whatever key a discovery surface is holding: the hardware
    /// id when known, otherwise the IP observed before the id arrived.
    #[must_use]
    pub fn find_by_discovery_id(&self, key: &str) -> Option<&BridgeRecord> {
        self.find_by_id(key).or_else(|| self.find_by_ip(key))
    }

    #[must_use]
    pub fn contains_ip(&self, ip: &str) -> bool {
        self.find_by_ip(ip).is_some()
    }

    /// Fold in a candidate observed via N-UPnP, SSDP or manual entry,
    /// deduplicating against everything already known. Returns whether the
    /// registry changed.
    pub fn observe_candidate(&mut self, mut candidate: BridgeRecord) -> bool {
        if !candidate.id.is_empty() {
            if let Some(found) = self.found.get(&candidate.id) {
                if found.ip == candidate.ip {
                    return false;
                }
                // a verified bridge moved address; adopt the new IP and let
                // the next sync pass re-verify it
                let mut updated = found.clone();
                updated.ip.clone_from(&candidate.ip);
                log::info!(
                    "Bridge {} changed address to {}",
                    updated.id,
                    updated.ip
                );
                self.found.insert(updated.id.clone(), updated);
                return true;
            }

            if let Some(existing) = self
                .not_found
                .iter_mut()
                .find(|b| b.id == candidate.id && b.ip != candidate.ip)
            {
                existing.ip.clone_from(&candidate.ip);
                return true;
            }
        }

        if self.contains_ip(&candidate.ip) {
            return false;
        }

        if candidate.custom_name.is_empty() {
            candidate.custom_name = self.generate_unique_name();
        }
        self.not_found.push(candidate);
        true
    }

    /// Default display names count up: "Bridge 1", "Bridge 2", ..
    #[must_use]
    pub fn generate_unique_name(&self) -> String {
        const PREFIX: &str = "Bridge ";

        let mut index = 1;
        for bridge in self.found.values().chain(&self.not_found) {
            if let Some(suffix) = bridge.custom_name.strip_prefix(PREFIX) {
                if let Ok(number) = suffix.parse::<u32>() {
                    index = index.max(number + 1);
                }
            }
        }
        format!("{PREFIX}{index}")
    }

    /// IP addresses can change between sessions. If another not-found entry
    /// shares this bridge's id under a different address and already holds a
    /// username, offer that username for an immediate re-test.
    #[must_use]
    pub fn username_donor(&self, bridge: &BridgeRecord) -> Option<String> {
        if bridge.id.is_empty() {
            return None;
        }
        self.not_found
            .iter()
            .find(|other| {
                other.id == bridge.id && other.ip != bridge.ip && !other.username.is_empty()
            })
            .map(|other| other.username.clone())
    }

    /// Every light across all verified bridges, sorted by name.
    #[must_use]
    pub fn lights(&self) -> Vec<LightMetadata> {
        self.found
            .values()
            .flat_map(|bridge| bridge.lights.values().cloned())
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect()
    }

    #[must_use]
    pub fn metadata_for_light(&self, unique_id: &str) -> Option<(&BridgeRecord, &LightMetadata)> {
        self.found.values().find_map(|bridge| {
            bridge
                .lights
                .get(unique_id)
                .map(|light| (bridge, light))
        })
    }

    /// The bridge owning a light.
    ///
    /// # Panics
    ///
    /// Panics if no known bridge owns `unique_id`. Per the data-model
    /// invariants every light id handed around comes out of a bridge record,
    /// so a miss here is a caller bug, not a runtime condition.
    #[must_use]
    pub fn bridge_for_light(&self, unique_id: &str) -> &BridgeRecord {
        self.metadata_for_light(unique_id)
            .map(|(bridge, _)| bridge)
            .unwrap_or_else(|| panic!("no bridge owns light {unique_id}"))
    }

    /// Every group id currently in use, across both sets.
    #[must_use]
    pub fn group_ids(&self) -> Vec<u64> {
        self.found
            .values()
            .chain(&self.not_found)
            .flat_map(|bridge| bridge.groups.iter().map(|group| group.id))
            .collect()
    }

    /// Re-use the id of an app-side group when a bridge reports the same
    /// name, so merged group data stays stable.
    #[must_use]
    pub fn group_id_for_name(&self, name: &str) -> Option<u64> {
        self.found
            .values()
            .chain(&self.not_found)
            .flat_map(|bridge| &bridge.groups)
            .find(|group| group.name == name)
            .map(|group| group.id)
    }

    #[must_use]
    pub fn overall_state(&self) -> OverallState {
        if !self.found.is_empty() && self.not_found.is_empty() {
            return OverallState::AllBridgesConnected;
        }

        for bridge in &self.not_found {
            if !bridge.ip.is_empty()
                && bridge.username.is_empty()
                && bridge.phase == DiscoveryPhase::LookingForUsername
            {
                return OverallState::FindingDeviceUsername;
            }
            if !self.found.is_empty() {
                return OverallState::BridgeConnected;
            }
            if !bridge.ip.is_empty() && !bridge.username.is_empty() {
                return OverallState::TestingFullConnection;
            }
        }
        OverallState::FindingIpAddress
    }

    /// Snapshot for the persistence layer: every record with a known id,
    /// found and not-found alike.
    #[must_use]
    pub fn to_persisted(&self) -> Vec<PersistedBridge> {
        self.found
            .values()
            .chain(&self.not_found)
            .filter(|bridge| !bridge.id.is_empty())
            .map(PersistedBridge::from)
            .sorted_by(|a, b| a.id.cmp(&b.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(id: &str, ip: &str, username: &str) -> BridgeRecord {
        let mut bridge = BridgeRecord::from_ip(ip);
        bridge.id = id.to_string();
        bridge.username = username.to_string();
        bridge.phase = bridge.implied_phase();
        bridge
    }

    fn connected(id: &str, ip: &str) -> BridgeRecord {
        let mut bridge = stub(id, ip, "user1");
        bridge.phase = DiscoveryPhase::Connected;
        bridge
    }

    #[test]
    fn promotion_removes_bridge_from_not_found() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", "user1"));
        assert_eq!(registry.not_found().len(), 1);

        registry.add_or_update(connected("aa", "192.168.1.10"));

        assert!(registry.found().contains_key("aa"));
        assert!(registry.not_found().is_empty());
    }

    #[test]
    fn bridge_is_never_in_both_sets() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", ""));
        registry.add_or_update(connected("aa", "192.168.1.10"));

        // a candidate for the already-found bridge must not re-create a stub
        registry.observe_candidate(stub("aa", "192.168.1.10", ""));
        assert!(registry.not_found().is_empty());

        // not even when its address changed
        registry.observe_candidate(stub("aa", "192.168.1.77", ""));
        assert!(registry.not_found().is_empty());
        assert_eq!(registry.found()["aa"].ip, "192.168.1.77");
    }

    #[test]
    #[should_panic(expected = "must have id, IP and username")]
    fn premature_promotion_is_a_caller_bug() {
        let mut registry = BridgeRegistry::new();
        let mut bridge = BridgeRecord::from_ip("192.168.1.10");
        bridge.phase = DiscoveryPhase::Connected;
        registry.add_or_update(bridge);
    }

    #[test]
    fn candidate_with_known_id_updates_ip_in_place() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", "user1"));

        registry.observe_candidate(stub("aa", "192.168.1.42", ""));

        assert_eq!(registry.not_found().len(), 1);
        assert_eq!(registry.not_found()[0].ip, "192.168.1.42");
        // the existing entry keeps its username
        assert_eq!(registry.not_found()[0].username, "user1");
    }

    #[test]
    fn candidate_with_known_ip_is_dropped() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("", "192.168.1.10", ""));
        assert!(!registry.observe_candidate(BridgeRecord::from_ip("192.168.1.10")));
        assert_eq!(registry.not_found().len(), 1);
    }

    #[test]
    fn discovery_id_lookup_tries_id_then_ip() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", ""));
        registry.add_or_update(stub("", "192.168.1.20", ""));

        assert_eq!(registry.find_by_discovery_id("aa").unwrap().ip, "192.168.1.10");
        assert_eq!(registry.find_by_discovery_id("192.168.1.20").unwrap().ip, "192.168.1.20");
        assert!(registry.find_by_discovery_id("bb").is_none());
    }

    #[test]
    fn same_id_under_two_addresses_coexists_until_promotion() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", "user1"));
        registry.add_or_update(stub("aa", "192.168.1.42", ""));
        assert_eq!(registry.not_found().len(), 2);

        // promotion on either address sweeps up both entries
        registry.add_or_update(connected("aa", "192.168.1.42"));
        assert!(registry.not_found().is_empty());
        assert_eq!(registry.found().len(), 1);
    }

    #[test]
    fn username_donor_requires_same_id_and_different_ip() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", "user1"));

        let newcomer = stub("aa", "192.168.1.42", "");
        assert_eq!(registry.username_donor(&newcomer).as_deref(), Some("user1"));

        let other_bridge = stub("bb", "192.168.1.43", "");
        assert!(registry.username_donor(&other_bridge).is_none());

        let anonymous = stub("", "192.168.1.44", "");
        assert!(registry.username_donor(&anonymous).is_none());
    }

    #[test]
    fn unique_names_count_up() {
        let mut registry = BridgeRegistry::new();
        assert_eq!(registry.generate_unique_name(), "Bridge 1");

        let mut bridge = stub("aa", "192.168.1.10", "");
        bridge.custom_name = "Bridge 3".to_string();
        registry.add_or_update(bridge);
        assert_eq!(registry.generate_unique_name(), "Bridge 4");
    }

    #[test]
    fn overall_state_progression() {
        let mut registry = BridgeRegistry::new();
        assert_eq!(registry.overall_state(), OverallState::FindingIpAddress);

        registry.add_or_update(stub("", "192.168.1.10", ""));
        assert_eq!(registry.overall_state(), OverallState::FindingDeviceUsername);

        registry.add_or_update(stub("", "192.168.1.10", "user1"));
        assert_eq!(registry.overall_state(), OverallState::TestingFullConnection);

        registry.add_or_update(connected("aa", "192.168.1.10"));
        assert_eq!(registry.overall_state(), OverallState::AllBridgesConnected);

        registry.add_or_update(stub("", "192.168.1.20", ""));
        assert_eq!(registry.overall_state(), OverallState::FindingDeviceUsername);
    }

    #[test]
    #[should_panic(expected = "no bridge owns light")]
    fn unknown_light_lookup_panics() {
        let registry = BridgeRegistry::new();
        let _ = registry.bridge_for_light("00:17:88:01:10:3e:3a:dc-0b");
    }

    #[test]
    fn persisted_snapshot_skips_id_less_stubs() {
        let mut registry = BridgeRegistry::new();
        registry.add_or_update(stub("aa", "192.168.1.10", "user1"));
        registry.add_or_update(stub("", "192.168.1.20", ""));

        let persisted = registry.to_persisted();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, "aa");
    }
}
