//! The bridge discovery routine.
//!
//! Each not-found bridge is walked through its phases on a fixed cadence:
//! wait for an address, ask for a username until the link button is pressed,
//! then prove the pair works with a full-state fetch. Probes run as detached
//! tasks; their classified replies come back over a channel, tagged with the
//! context they were issued under, so nothing is ever reconstructed from a
//! reply URL.

pub mod upnp;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, sleep_until};

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::hue::api::{
    ApiGroup, DiscoveryCandidate, FullState, HueApiResult, HueError, LightStateUpdate,
};
use crate::hue::client::HueClient;
use crate::hue::normalize_bridge_id;
use crate::hue::reply::{
    DiscoveryReply, UpdateKind, light_state_echoes, username_from_successes,
};
use crate::model::bridge::{
    BridgeRecord, DiscoveryPhase, lights_from_map, schedules_from_map,
};
use crate::model::group::{Group, next_group_id};
use crate::model::schedule::{idle_timeout_body, idle_timeout_name, idle_timeout_update};
use crate::persistence::JsonStore;
use crate::registry::{BridgeRegistry, OverallState};
use crate::service::Service;

use self::upnp::{UpnpDiscovery, UpnpPacket, bridge_id_from_announcement, is_bridge_announcement};

/// Outward notifications, replacing what would otherwise be callback
/// spaghetti between discovery and its consumers.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    BridgeDiscovered { id: String },
    DiscoveryStateChanged(OverallState),
    LightRenamed { unique_id: String, name: String },
    LightDeleted { unique_id: String },
    PacketReceived,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    /// N-UPnP query against the shared discovery endpoint.
    BroadcastDiscovery,
    /// `POST /api` pairing attempt.
    CreateUser,
    /// `GET /api/<username>` credentials check on a not-found bridge.
    VerifyConnection,
    /// `GET /api/<username>` refresh of an already-found bridge.
    SyncState,
}

/// Attached to every outbound request and carried through to its reply.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub kind: RequestKind,
    pub ip: String,
    pub username: String,
}

impl RequestContext {
    fn broadcast() -> Self {
        Self {
            kind: RequestKind::BroadcastDiscovery,
            ip: String::new(),
            username: String::new(),
        }
    }

    fn create_user(ip: &str) -> Self {
        Self {
            kind: RequestKind::CreateUser,
            ip: ip.to_string(),
            username: String::new(),
        }
    }

    fn verify(bridge: &BridgeRecord) -> Self {
        Self {
            kind: RequestKind::VerifyConnection,
            ip: bridge.ip.clone(),
            username: bridge.username.clone(),
        }
    }

    fn sync(bridge: &BridgeRecord) -> Self {
        Self {
            kind: RequestKind::SyncState,
            ip: bridge.ip.clone(),
            username: bridge.username.clone(),
        }
    }

    fn target(&self) -> &str {
        if self.ip.is_empty() {
            "broadcast discovery"
        } else {
            &self.ip
        }
    }
}

#[derive(Debug)]
struct ReplyEnvelope {
    ctx: RequestContext,
    reply: DiscoveryReply,
}

/// Status bits surfaced for UI layers alongside the registry itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscoveryStatus {
    pub received_nupnp_traffic: bool,
    pub last_discovery_time: Option<DateTime<Local>>,
}

/// The discovery service. Owns the registry, the persistence store and the
/// poll loop; everything else talks to it through a [`DiscoveryHandle`].
pub struct BridgeDiscovery {
    conf: crate::config::DiscoveryConfig,
    app_name: String,
    client: HueClient,
    registry: Arc<Mutex<BridgeRegistry>>,
    store: Arc<Mutex<JsonStore>>,
    status: Arc<Mutex<DiscoveryStatus>>,
    upnp: Arc<UpnpDiscovery>,
    upnp_held: bool,
    startup_finished: bool,
    startup_deadline: Instant,
    replies_tx: mpsc::UnboundedSender<ReplyEnvelope>,
    replies_rx: mpsc::UnboundedReceiver<ReplyEnvelope>,
    events: broadcast::Sender<DiscoveryEvent>,
    last_nupnp: Option<Instant>,
    last_overall: Option<OverallState>,
}

impl BridgeDiscovery {
    const EVENT_CAPACITY: usize = 64;

    pub fn new(config: &AppConfig, upnp: Arc<UpnpDiscovery>) -> ApiResult<Self> {
        let client = HueClient::new(
            config.app.devicetype(),
            config.discovery.nupnp_url.clone(),
        )?;
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        Ok(Self {
            conf: config.discovery.clone(),
            app_name: config.app.name.clone(),
            client,
            registry: Arc::new(Mutex::new(BridgeRegistry::new())),
            store: Arc::new(Mutex::new(JsonStore::new(
                config.discovery.state_file.clone(),
            ))),
            status: Arc::new(Mutex::new(DiscoveryStatus::default())),
            upnp,
            upnp_held: false,
            startup_finished: false,
            startup_deadline: Instant::now(),
            replies_tx,
            replies_rx,
            events: broadcast::Sender::new(Self::EVENT_CAPACITY),
            last_nupnp: None,
            last_overall: None,
        })
    }

    #[must_use]
    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            registry: self.registry.clone(),
            store: self.store.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            client: self.client.clone(),
        }
    }

    fn send_event(&self, event: DiscoveryEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    /// One pass over the not-found set: decide which probe (if any) each
    /// bridge gets this tick, applying the username-migration rule for
    /// bridges whose address changed. Registry mutations happen here; the
    /// returned contexts are issued by the caller.
    fn plan_probes(registry: &mut BridgeRegistry) -> Vec<RequestContext> {
        let mut probes = vec![];

        for bridge in registry.not_found().to_vec() {
            if bridge.ip.is_empty() {
                // nothing to probe; N-UPnP or SSDP has to supply an address
                continue;
            }

            if bridge.username.is_empty() {
                if let Some(username) = registry.username_donor(&bridge) {
                    let mut updated = bridge;
                    updated.username = username;
                    updated.phase = DiscoveryPhase::TestingConnectionInfo;
                    registry.add_or_update(updated.clone());
                    probes.push(RequestContext::verify(&updated));
                } else {
                    probes.push(RequestContext::create_user(&bridge.ip));
                }
            } else {
                if bridge.phase != DiscoveryPhase::TestingConnectionInfo {
                    let mut updated = bridge.clone();
                    updated.phase = DiscoveryPhase::TestingConnectionInfo;
                    registry.add_or_update(updated);
                }
                probes.push(RequestContext::verify(&bridge));
            }
        }

        probes
    }

    fn spawn_probe(&self, ctx: RequestContext) {
        let client = self.client.clone();
        let tx = self.replies_tx.clone();
        tokio::spawn(async move {
            let result = match ctx.kind {
                RequestKind::BroadcastDiscovery => client.nupnp_discover().await,
                RequestKind::CreateUser => client.create_user(&ctx.ip).await,
                RequestKind::VerifyConnection | RequestKind::SyncState => {
                    client.full_state(&ctx.ip, &ctx.username).await
                }
            };
            match result {
                Ok(reply) => {
                    let _ = tx.send(ReplyEnvelope { ctx, reply });
                }
                // transient failures are retried on the next tick
                Err(err) => log::debug!("Probe of {} failed: {err}", ctx.target()),
            }
        });
    }

    async fn handle_tick(&mut self) {
        let probes = {
            let mut registry = self.registry.lock().await;
            Self::plan_probes(&mut registry)
        };
        for ctx in probes {
            self.spawn_probe(ctx);
        }

        // the discovery endpoint is a shared external service; never query
        // it more often than the configured floor, whatever the poll cadence
        let nupnp_due = self
            .last_nupnp
            .is_none_or(|last| last.elapsed() >= Duration::from_millis(self.conf.nupnp_interval_ms));
        if nupnp_due {
            self.last_nupnp = Some(Instant::now());
            self.spawn_probe(RequestContext::broadcast());
        }
    }

    async fn handle_sync_tick(&self) {
        let contexts: Vec<RequestContext> = {
            let registry = self.registry.lock().await;
            registry.found().values().map(RequestContext::sync).collect()
        };
        for ctx in contexts {
            self.spawn_probe(ctx);
        }
    }

    async fn handle_reply(&mut self, envelope: ReplyEnvelope) {
        let ReplyEnvelope { ctx, reply } = envelope;
        match (ctx.kind, reply) {
            (RequestKind::BroadcastDiscovery, DiscoveryReply::Discovery(candidates)) => {
                self.handle_nupnp(candidates).await;
            }
            (RequestKind::CreateUser, DiscoveryReply::Errors(errors)) => {
                self.handle_pairing_refused(&ctx.ip, &errors).await;
            }
            (RequestKind::CreateUser, DiscoveryReply::Successes(successes)) => {
                self.handle_auth_grant(&ctx.ip, &successes).await;
            }
            (
                RequestKind::VerifyConnection | RequestKind::SyncState,
                DiscoveryReply::FullState(state),
            ) => {
                self.handle_full_state(&ctx.ip, *state).await;
            }
            (RequestKind::VerifyConnection, DiscoveryReply::Errors(errors)) => {
                self.handle_verify_error(&ctx.ip, &errors).await;
            }
            (RequestKind::SyncState, DiscoveryReply::Errors(errors)) => {
                for error in &errors {
                    log::warn!(
                        "Connected bridge {} returned an error: {}",
                        ctx.ip,
                        error.description
                    );
                }
            }
            (kind, reply) => {
                log::debug!("Ignoring unexpected {reply:?} for {kind:?} to {}", ctx.target());
            }
        }

        self.persist().await;
        self.emit_state_change().await;
        self.update_upnp_subscription().await;
    }

    async fn handle_nupnp(&mut self, candidates: Vec<DiscoveryCandidate>) {
        {
            let mut status = self.status.lock().await;
            status.received_nupnp_traffic = true;
        }
        self.send_event(DiscoveryEvent::PacketReceived);

        let mut registry = self.registry.lock().await;
        for candidate in candidates {
            let mut bridge = BridgeRecord::from_ip(candidate.internal_ip_address);
            bridge.id = normalize_bridge_id(&candidate.id);
            if registry.observe_candidate(bridge) {
                log::info!("New bridge candidate from broadcast discovery");
            }
        }
    }

    async fn handle_upnp(&mut self, packet: UpnpPacket) {
        if !is_bridge_announcement(&packet.payload) {
            return;
        }
        self.send_event(DiscoveryEvent::PacketReceived);

        let mut bridge = BridgeRecord::from_ip(packet.sender.to_string());
        if let Some(id) = bridge_id_from_announcement(&packet.payload) {
            bridge.id = id;
        }

        let mut registry = self.registry.lock().await;
        if registry.observe_candidate(bridge) {
            log::info!("New bridge candidate from SSDP ({})", packet.sender);
        }
    }

    /// An error array on an unauthenticated probe is the normal "link button
    /// not pressed" signal: it proves a bridge answers at that address.
    async fn handle_pairing_refused(&self, ip: &str, errors: &[HueError]) {
        let mut registry = self.registry.lock().await;
        let Some(bridge) = registry.not_found().iter().find(|b| b.ip == ip).cloned() else {
            return;
        };

        if !bridge.username.is_empty() {
            log::warn!("Bridge {ip} rejected a pairing probe despite an existing username");
        }
        for error in errors {
            log::debug!("Bridge {ip} refused pairing: {}", error.description);
        }

        if bridge.phase != DiscoveryPhase::LookingForUsername {
            let mut updated = bridge;
            updated.phase = DiscoveryPhase::LookingForUsername;
            registry.add_or_update(updated);
        }
    }

    async fn handle_auth_grant(&self, ip: &str, successes: &[Map<String, Value>]) {
        let Some(username) = username_from_successes(successes) else {
            log::debug!("Success reply from {ip} carried no username");
            return;
        };

        let updated = {
            let mut registry = self.registry.lock().await;
            let Some(bridge) = registry.not_found().iter().find(|b| b.ip == ip).cloned() else {
                return;
            };
            let mut updated = bridge;
            updated.username = username;
            updated.phase = DiscoveryPhase::TestingConnectionInfo;
            registry.add_or_update(updated.clone());
            updated
        };

        log::info!("Discovered username for bridge at {ip}");
        // no reason to wait a tick; check the new credentials right away
        self.spawn_probe(RequestContext::verify(&updated));
    }

    /// A failed credentials check loops the bridge back exactly one step.
    async fn handle_verify_error(&self, ip: &str, errors: &[HueError]) {
        let mut registry = self.registry.lock().await;
        let Some(bridge) = registry.not_found().iter().find(|b| b.ip == ip).cloned() else {
            return;
        };

        if !bridge.username.is_empty() {
            log::warn!(
                "Bridge {ip} rejected its stored username ({}); restarting pairing",
                errors
                    .first()
                    .map_or("no error detail", |e| e.description.as_str())
            );
        }

        let mut updated = bridge;
        updated.username.clear();
        updated.phase = DiscoveryPhase::LookingForUsername;
        registry.add_or_update(updated);
    }

    /// A full-state dump is both the credentials proof and the data source:
    /// the bridge is promoted into the found set and its lights, groups and
    /// schedules replaced wholesale.
    async fn handle_full_state(&mut self, ip: &str, state: FullState) {
        let mut events = vec![];
        let promoted;
        let idle_check;

        {
            let mut registry = self.registry.lock().await;
            let record = registry
                .not_found()
                .iter()
                .find(|b| b.ip == ip)
                .cloned()
                .or_else(|| registry.found().values().find(|b| b.ip == ip).cloned());
            let Some(mut bridge) = record else {
                log::debug!("Full state from unknown address {ip}");
                return;
            };
            if bridge.username.is_empty() {
                log::debug!("Full state for {ip} raced a pairing reset; dropping");
                return;
            }

            promoted = bridge.phase != DiscoveryPhase::Connected;
            bridge.apply_config(&state.config);
            if bridge.id.is_empty() {
                log::debug!("Full state from {ip} carried no bridge id; dropping");
                return;
            }

            let fresh = lights_from_map(&state.lights);
            for (unique_id, light) in &fresh {
                let renamed = bridge
                    .lights
                    .get(unique_id)
                    .is_some_and(|old| !old.name.is_empty() && old.name != light.name);
                if renamed {
                    events.push(DiscoveryEvent::LightRenamed {
                        unique_id: unique_id.clone(),
                        name: light.name.clone(),
                    });
                }
            }
            for unique_id in bridge.lights.keys() {
                if !fresh.contains_key(unique_id) {
                    events.push(DiscoveryEvent::LightDeleted {
                        unique_id: unique_id.clone(),
                    });
                }
            }

            bridge.lights = fresh;
            bridge.schedules = schedules_from_map(&state.schedules);
            bridge.groups = Self::groups_from_map(&registry, &state.groups);
            bridge.phase = DiscoveryPhase::Connected;

            idle_check = (
                bridge.ip.clone(),
                bridge.username.clone(),
                bridge.lights.values().map(|l| l.index).collect::<Vec<_>>(),
                bridge
                    .schedules
                    .iter()
                    .map(|s| s.name.clone())
                    .collect::<HashSet<_>>(),
            );

            if promoted {
                log::info!("Bridge {} fully connected at {}", bridge.id, bridge.ip);
                events.push(DiscoveryEvent::BridgeDiscovered {
                    id: bridge.id.clone(),
                });
            }
            registry.add_or_update(bridge);
        }

        if promoted {
            let mut status = self.status.lock().await;
            status.last_discovery_time = Some(Local::now());
        }
        for event in events {
            self.send_event(event);
        }

        let (bridge_ip, username, light_indices, schedule_names) = idle_check;
        self.ensure_idle_timeouts(&bridge_ip, &username, &light_indices, &schedule_names);
    }

    /// Convert the `groups` section, assigning each group an id: reuse the
    /// app-side id when a group of the same name exists, otherwise mint one
    /// below everything currently known.
    fn groups_from_map(registry: &BridgeRegistry, groups: &Map<String, Value>) -> Vec<Group> {
        let mut known = registry.group_ids();
        let mut result = vec![];

        for (key, value) in groups {
            let Some(object) = value.as_object() else {
                continue;
            };
            if UpdateKind::classify(object) != UpdateKind::Group {
                log::debug!("Skipping non-group entry under groups[{key}]");
                continue;
            }
            let Ok(bridge_index) = key.parse::<u32>() else {
                continue;
            };
            let Ok(api) = serde_json::from_value::<ApiGroup>(value.clone()) else {
                log::debug!("Skipping malformed group {key}");
                continue;
            };

            let id = registry
                .group_id_for_name(&api.name)
                .unwrap_or_else(|| next_group_id(known.iter()));
            known.push(id);
            result.push(Group::from_api(id, bridge_index, &api));
        }

        result
    }

    /// Every connected light gets a bridge-side auto-off schedule; re-create
    /// any that are missing after a schedule sweep.
    fn ensure_idle_timeouts(
        &self,
        ip: &str,
        username: &str,
        light_indices: &[u32],
        schedule_names: &HashSet<String>,
    ) {
        for &index in light_indices {
            let name = idle_timeout_name(&self.app_name, index);
            if schedule_names.contains(&name) {
                continue;
            }

            let body = idle_timeout_body(&self.app_name, username, index, self.conf.idle_timeout_minutes);
            let client = self.client.clone();
            let ip = ip.to_string();
            let username = username.to_string();
            tokio::spawn(async move {
                match client.create_schedule(&ip, &username, &body).await {
                    Ok(reply) => {
                        for entry in reply {
                            if let HueApiResult::Error(err) = entry {
                                log::warn!(
                                    "Bridge {ip} refused timeout schedule: {}",
                                    err.description
                                );
                            }
                        }
                    }
                    Err(err) => log::debug!("Creating timeout schedule on {ip} failed: {err}"),
                }
            });
        }
    }

    async fn persist(&self) {
        let snapshot = self.registry.lock().await.to_persisted();
        match self.store.lock().await.save(&snapshot) {
            Ok(true) => log::debug!("State file updated"),
            Ok(false) => {}
            Err(err) => log::error!("Failed to persist bridge registry: {err}"),
        }
    }

    async fn emit_state_change(&mut self) {
        let state = self.registry.lock().await.overall_state();
        if self.last_overall != Some(state) {
            self.last_overall = Some(state);
            self.send_event(DiscoveryEvent::DiscoveryStateChanged(state));
        }
    }

    /// During the startup window the SSDP listener stays subscribed no
    /// matter what; afterwards it is held only while bridges remain to find.
    async fn update_upnp_subscription(&mut self) {
        let pending = !self.registry.lock().await.not_found().is_empty();
        let wants = !self.startup_finished || pending;

        if wants && !self.upnp_held {
            self.upnp.add_listener();
            self.upnp_held = true;
        } else if !wants && self.upnp_held {
            self.upnp.remove_listener();
            self.upnp_held = false;
        }
    }
}

#[async_trait]
impl Service for BridgeDiscovery {
    type Error = ApiError;

    async fn start(&mut self) -> ApiResult<()> {
        let loaded = self.store.lock().await.load()?;
        if !loaded.is_empty() {
            log::info!("Loaded {} bridge(s) from state file; re-verifying", loaded.len());
            let mut registry = self.registry.lock().await;
            for persisted in loaded {
                registry.add_or_update(persisted.into_record());
            }
        }

        self.upnp.add_listener();
        self.upnp_held = true;
        self.startup_deadline =
            Instant::now() + Duration::from_secs(self.conf.startup_window_secs);
        Ok(())
    }

    async fn run(&mut self) -> ApiResult<()> {
        let mut upnp_rx = self.upnp.subscribe();

        let mut poll = interval(Duration::from_millis(self.conf.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sync = interval(Duration::from_millis(self.conf.sync_interval_ms));
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let startup = sleep_until(self.startup_deadline);
        tokio::pin!(startup);

        loop {
            tokio::select! {
                _ = poll.tick() => self.handle_tick().await,
                _ = sync.tick() => self.handle_sync_tick().await,
                () = &mut startup, if !self.startup_finished => {
                    self.startup_finished = true;
                    self.update_upnp_subscription().await;
                }
                reply = self.replies_rx.recv() => {
                    if let Some(envelope) = reply {
                        self.handle_reply(envelope).await;
                    }
                }
                packet = upnp_rx.recv() => match packet {
                    Ok(packet) => self.handle_upnp(packet).await,
                    Err(RecvError::Lagged(n)) => log::debug!("SSDP receiver lagged by {n} packets"),
                    Err(RecvError::Closed) => {
                        return Err(ApiError::service_error("SSDP channel closed"));
                    }
                },
            }
        }
    }

    async fn stop(&mut self) -> ApiResult<()> {
        if self.upnp_held {
            self.upnp.remove_listener();
            self.upnp_held = false;
        }
        self.persist().await;
        Ok(())
    }
}

/// Cloneable facade over the discovery service's shared state, for UI layers
/// and the CLI.
#[derive(Clone)]
pub struct DiscoveryHandle {
    registry: Arc<Mutex<BridgeRegistry>>,
    store: Arc<Mutex<JsonStore>>,
    status: Arc<Mutex<DiscoveryStatus>>,
    events: broadcast::Sender<DiscoveryEvent>,
    client: HueClient,
}

impl DiscoveryHandle {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Seed discovery with a manually entered address.
    pub async fn add_manual_ip(&self, ip: &str) -> bool {
        let mut registry = self.registry.lock().await;
        registry.observe_candidate(BridgeRecord::from_ip(ip))
    }

    /// Set the app-side display name of a bridge. The key may be a bridge id
    /// or, for bridges still lacking one, an IP.
    pub async fn change_name(&self, discovery_id: &str, name: &str) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(bridge) = registry.find_by_discovery_id(discovery_id).cloned() else {
            return false;
        };
        let mut updated = bridge;
        updated.custom_name = name.to_string();
        registry.add_or_update(updated);
        drop(registry);

        self.persist().await;
        true
    }

    /// Forget a bridge entirely, including its persisted entry.
    pub async fn delete_bridge(&self, id: &str) -> ApiResult<bool> {
        let removed = self.registry.lock().await.remove(id);
        if removed {
            self.store.lock().await.remove_by_id(id)?;
        }
        Ok(removed)
    }

    /// Remove a light from its bridge, both in the registry and on the
    /// bridge itself.
    pub async fn delete_light(&self, unique_id: &str) -> ApiResult<bool> {
        let (bridge, index) = {
            let registry = self.registry.lock().await;
            let Some((bridge, light)) = registry.metadata_for_light(unique_id) else {
                return Ok(false);
            };
            (bridge.clone(), light.index)
        };

        self.client
            .delete_light(&bridge.ip, &bridge.username, index)
            .await?;

        let mut registry = self.registry.lock().await;
        let mut updated = bridge;
        updated.lights.remove(unique_id);
        registry.add_or_update(updated);
        drop(registry);

        self.persist().await;
        let _ = self.events.send(DiscoveryEvent::LightDeleted {
            unique_id: unique_id.to_string(),
        });
        Ok(true)
    }

    /// Push a state change to a light and fold the bridge's per-key success
    /// echoes back into the stored record.
    pub async fn set_light_state(
        &self,
        unique_id: &str,
        update: LightStateUpdate,
    ) -> ApiResult<()> {
        let (bridge, index) = {
            let registry = self.registry.lock().await;
            let bridge = registry.bridge_for_light(unique_id);
            let index = bridge.lights[unique_id].index;
            (bridge.clone(), index)
        };

        let reply = self
            .client
            .set_light_state(&bridge.ip, &bridge.username, index, update)
            .await?;

        let successes: Vec<Map<String, Value>> = reply
            .into_iter()
            .filter_map(|entry| match entry {
                HueApiResult::Success(Value::Object(map)) => Some(map),
                HueApiResult::Success(_) => None,
                HueApiResult::Error(err) => {
                    log::warn!(
                        "Bridge {} rejected state change: {}",
                        bridge.ip,
                        err.description
                    );
                    None
                }
            })
            .collect();

        let mut registry = self.registry.lock().await;
        let mut updated = bridge;
        let mut changed = false;
        for echo in light_state_echoes(&successes) {
            if let Some(light) = updated
                .lights
                .values_mut()
                .find(|light| light.index == echo.index)
            {
                changed |= light.apply_echo(&echo.key, &echo.value);
            }
        }
        if changed {
            registry.add_or_update(updated);
        }
        Ok(())
    }

    /// Trigger a bridge-side scan for freshly paired lights.
    pub async fn search_for_new_lights(&self, id: &str) -> ApiResult<()> {
        let bridge = self.found_bridge(id).await?;
        self.client
            .search_for_new_lights(&bridge.ip, &bridge.username)
            .await?;
        Ok(())
    }

    /// Fetch the results of the last new-light scan.
    pub async fn new_lights(&self, id: &str) -> ApiResult<Value> {
        let bridge = self.found_bridge(id).await?;
        self.client.new_lights(&bridge.ip, &bridge.username).await
    }

    /// Adjust an idle-timeout schedule in place.
    pub async fn update_idle_timeout(
        &self,
        id: &str,
        schedule_index: u32,
        enable: bool,
        minutes: u32,
    ) -> ApiResult<()> {
        let bridge = self.found_bridge(id).await?;
        let body = idle_timeout_update(enable, minutes);
        self.client
            .update_schedule(&bridge.ip, &bridge.username, schedule_index, &body)
            .await?;
        Ok(())
    }

    async fn found_bridge(&self, id: &str) -> ApiResult<BridgeRecord> {
        self.registry
            .lock()
            .await
            .found()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::BridgeNotFound(id.to_string()))
    }

    pub async fn found_bridges(&self) -> Vec<BridgeRecord> {
        self.registry.lock().await.found().values().cloned().collect()
    }

    pub async fn not_found_bridges(&self) -> Vec<BridgeRecord> {
        self.registry.lock().await.not_found().to_vec()
    }

    pub async fn lights(&self) -> Vec<crate::model::light::LightMetadata> {
        self.registry.lock().await.lights()
    }

    pub async fn overall_state(&self) -> OverallState {
        self.registry.lock().await.overall_state()
    }

    pub async fn status(&self) -> DiscoveryStatus {
        *self.status.lock().await
    }

    async fn persist(&self) {
        let snapshot = self.registry.lock().await.to_persisted();
        if let Err(err) = self.store.lock().await.save(&snapshot) {
            log::error!("Failed to persist bridge registry: {err}");
        }
    }
}
