use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::AsRawFd;
use std::sync::Mutex;

use nix::sys::socket::sockopt::ReuseAddr;
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, SockaddrIn};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ApiResult;
use crate::hue::{UPNP_BRIDGE_ID_PREFIX, UPNP_BRIDGE_MARKER, normalize_bridge_id};

/// One datagram received on the SSDP multicast group.
#[derive(Clone, Debug)]
pub struct UpnpPacket {
    pub sender: IpAddr,
    pub payload: String,
}

/// Listens on the SSDP multicast group and fans packets out to subscribers.
///
/// The socket is only held while at least one listener is registered.
/// Consumers call [`UpnpDiscovery::add_listener`]/[`remove_listener`] in
/// pairs; the count going 0→1 binds the socket and 1→0 releases it, so idle
/// periods cost neither battery nor a port claim.
#[derive(Debug)]
pub struct UpnpDiscovery {
    tx: broadcast::Sender<UpnpPacket>,
    state: Mutex<ListenerState>,
}

#[derive(Debug, Default)]
struct ListenerState {
    listeners: usize,
    task: Option<JoinHandle<()>>,
}

impl UpnpDiscovery {
    pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
    pub const MULTICAST_PORT: u16 = 1900;

    const CHANNEL_CAPACITY: usize = 64;
    const RECV_BUFFER: usize = 2048;

    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: broadcast::Sender::new(Self::CHANNEL_CAPACITY),
            state: Mutex::new(ListenerState::default()),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UpnpPacket> {
        self.tx.subscribe()
    }

    pub fn add_listener(&self) {
        let mut state = self.state.lock().expect("listener state poisoned");
        state.listeners += 1;
        if state.listeners == 1 {
            let tx = self.tx.clone();
            state.task = Some(tokio::spawn(async move {
                if let Err(err) = Self::listen(tx).await {
                    log::error!("SSDP listener failed: {err}");
                }
            }));
            log::debug!("SSDP listener bound");
        }
    }

    pub fn remove_listener(&self) {
        let mut state = self.state.lock().expect("listener state poisoned");
        state.listeners = state.listeners.saturating_sub(1);
        if state.listeners == 0 {
            if let Some(task) = state.task.take() {
                task.abort();
                log::debug!("SSDP listener released");
            }
        }
    }

    async fn listen(tx: broadcast::Sender<UpnpPacket>) -> ApiResult<()> {
        let socket = bind_multicast()?;
        let mut buf = vec![0u8; Self::RECV_BUFFER];

        loop {
            let (len, addr) = socket.recv_from(&mut buf).await?;
            let payload = String::from_utf8_lossy(&buf[..len]).to_string();
            // nobody subscribed is fine; packets are simply dropped
            let _ = tx.send(UpnpPacket {
                sender: addr.ip(),
                payload,
            });
        }
    }
}

impl Default for UpnpDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind the SSDP port with `SO_REUSEADDR` set, so heimdall coexists with any
/// other SSDP-aware software on the host, then join the multicast group.
fn bind_multicast() -> ApiResult<UdpSocket> {
    let fd = socket::socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )?;
    socket::setsockopt(&fd, ReuseAddr, &true)?;
    socket::bind(
        fd.as_raw_fd(),
        &SockaddrIn::new(0, 0, 0, 0, UpnpDiscovery::MULTICAST_PORT),
    )?;

    let std_socket = std::net::UdpSocket::from(fd);
    std_socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(std_socket)?;
    socket.join_multicast_v4(UpnpDiscovery::MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)?;
    Ok(socket)
}

/// Whether an SSDP payload announces a Hue bridge.
#[must_use]
pub fn is_bridge_announcement(payload: &str) -> bool {
    payload.contains(UPNP_BRIDGE_MARKER)
}

/// Extract the bridge id from a `hue-bridgeid:` header line, if present.
#[must_use]
pub fn bridge_id_from_announcement(payload: &str) -> Option<String> {
    payload
        .lines()
        .find_map(|line| line.trim().strip_prefix(UPNP_BRIDGE_ID_PREFIX))
        .map(|id| normalize_bridge_id(id.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOUNCEMENT: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=100\r\n\
        LOCATION: http://192.168.1.10:80/description.xml\r\n\
        SERVER: Hue/1.0 UPnP/1.0 IpBridge/1.24.0\r\n\
        NTS: ssdp:alive\r\n\
        hue-bridgeid: 001788FFFE09A206\r\n\
        \r\n";

    #[test]
    fn bridge_announcements_are_recognized() {
        assert!(is_bridge_announcement(ANNOUNCEMENT));
        assert!(!is_bridge_announcement(
            "NOTIFY * HTTP/1.1\r\nSERVER: Sonos/1.0\r\n"
        ));
    }

    #[test]
    fn bridge_id_is_extracted_and_lowercased() {
        assert_eq!(
            bridge_id_from_announcement(ANNOUNCEMENT).as_deref(),
            Some("001788fffe09a206")
        );
    }

    #[test]
    fn announcement_without_id_line_yields_none() {
        let payload = "NOTIFY * HTTP/1.1\r\nSERVER: IpBridge/1.24.0\r\n";
        assert!(is_bridge_announcement(payload));
        assert!(bridge_id_from_announcement(payload).is_none());
    }
}
