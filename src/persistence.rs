use std::fs;

use camino::Utf8PathBuf;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::model::bridge::PersistedBridge;

/// Bridge records on disk: a single JSON array, one object per bridge.
///
/// The last-written array is cached so saves that would not change the file
/// are skipped entirely; discovery saves after every reply, and most replies
/// change nothing.
#[derive(Debug)]
pub struct JsonStore {
    path: Utf8PathBuf,
    cached: Option<Value>,
}

impl JsonStore {
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self { path, cached: None }
    }

    /// Load the persisted bridges. A missing file is an empty registry, not
    /// an error; a corrupt file is reported, since silently discarding
    /// credentials would force the user to re-pair every bridge.
    pub fn load(&mut self) -> ApiResult<Vec<PersistedBridge>> {
        if !self.path.is_file() {
            log::debug!("No state file at {}, starting empty", self.path);
            self.cached = Some(Value::Array(vec![]));
            return Ok(vec![]);
        }

        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| ApiError::StateFile(self.path.clone(), err.to_string()))?;
        let Value::Array(items) = &value else {
            return Err(ApiError::StateFile(
                self.path.clone(),
                "expected a JSON array".to_string(),
            ));
        };

        let mut bridges = vec![];
        for item in items {
            match serde_json::from_value::<PersistedBridge>(item.clone()) {
                // only entries with the full id/IP/username triple are worth
                // reviving; anything else would be re-discovered from scratch
                Ok(bridge)
                    if !bridge.id.is_empty()
                        && !bridge.ip.is_empty()
                        && !bridge.username.is_empty() =>
                {
                    bridges.push(bridge);
                }
                Ok(_) => log::debug!("Skipping incomplete bridge entry in {}", self.path),
                Err(err) => log::warn!("Skipping malformed bridge entry in {}: {err}", self.path),
            }
        }

        self.cached = Some(value);
        Ok(bridges)
    }

    /// Write the registry snapshot if it differs from what is already on
    /// disk. Returns whether a write happened.
    pub fn save(&mut self, bridges: &[PersistedBridge]) -> ApiResult<bool> {
        let value = serde_json::to_value(bridges)?;
        if self.cached.as_ref() == Some(&value) {
            return Ok(false);
        }

        fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        self.cached = Some(value);
        Ok(true)
    }

    /// Purge the entry with the given bridge id. Returns whether an entry
    /// was removed.
    pub fn remove_by_id(&mut self, id: &str) -> ApiResult<bool> {
        let Some(Value::Array(items)) = &self.cached else {
            return Ok(false);
        };

        let remaining: Vec<Value> = items
            .iter()
            .filter(|item| item.get("id").and_then(Value::as_str) != Some(id))
            .cloned()
            .collect();
        if remaining.len() == items.len() {
            return Ok(false);
        }

        let value = Value::Array(remaining);
        fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        self.cached = Some(value);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bridge::PersistedLight;

    fn temp_store(name: &str) -> JsonStore {
        let mut path = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .expect("temp dir should be utf-8");
        path.push(format!("heimdall-{name}-{}.json", std::process::id()));
        JsonStore::new(path)
    }

    fn persisted(id: &str, ip: &str) -> PersistedBridge {
        PersistedBridge {
            id: id.to_string(),
            ip: ip.to_string(),
            username: "user1".to_string(),
            custom_name: "Bridge 1".to_string(),
            lights: vec![PersistedLight {
                unique_id: "00:17:88:01:10:3e:3a:dc-0b".to_string(),
                index: 1,
                name: "Desk".to_string(),
                software_version: "1.29".to_string(),
            }],
            ..PersistedBridge::default()
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let mut store = temp_store("missing");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn round_trip_preserves_identity_fields() {
        let mut store = temp_store("roundtrip");
        let bridges = vec![persisted("aa", "192.168.1.10"), persisted("bb", "192.168.1.11")];
        assert!(store.save(&bridges).unwrap());

        let mut reloaded = temp_store("roundtrip");
        let loaded = reloaded.load().unwrap();
        assert_eq!(loaded, bridges);
    }

    #[test]
    fn unchanged_save_is_skipped() {
        let mut store = temp_store("unchanged");
        let bridges = vec![persisted("aa", "192.168.1.10")];
        assert!(store.save(&bridges).unwrap());
        assert!(!store.save(&bridges).unwrap());

        let changed = vec![persisted("aa", "192.168.1.42")];
        assert!(store.save(&changed).unwrap());
    }

    #[test]
    fn remove_purges_matching_entry() {
        let mut store = temp_store("remove");
        let bridges = vec![persisted("aa", "192.168.1.10"), persisted("bb", "192.168.1.11")];
        store.save(&bridges).unwrap();

        assert!(store.remove_by_id("aa").unwrap());
        assert!(!store.remove_by_id("aa").unwrap());

        let mut reloaded = temp_store("remove");
        let loaded = reloaded.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "bb");
    }

    #[test]
    fn incomplete_entries_are_not_revived() {
        let mut store = temp_store("incomplete");
        let mut no_username = persisted("aa", "192.168.1.10");
        no_username.username = String::new();
        store.save(&[no_username, persisted("bb", "192.168.1.11")]).unwrap();

        let mut reloaded = temp_store("incomplete");
        let loaded = reloaded.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "bb");
    }
}
