pub mod api;
pub mod client;
pub mod color;
pub mod reply;

/// Substring identifying a Hue bridge in an SSDP announcement.
pub const UPNP_BRIDGE_MARKER: &str = "IpBridge";

/// Header line carrying the bridge id in an SSDP announcement.
pub const UPNP_BRIDGE_ID_PREFIX: &str = "hue-bridgeid: ";

/// Bridges report their id in inconsistent case depending on the source
/// (N-UPnP, SSDP, full-state config). Lowercase is canonical in the registry.
#[must_use]
pub fn normalize_bridge_id(id: &str) -> String {
    id.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::normalize_bridge_id;

    #[test]
    fn bridge_id_is_lowercased() {
        assert_eq!(
            normalize_bridge_id("001788FFFE09A206"),
            "001788fffe09a206"
        );
    }
}
