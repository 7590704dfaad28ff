use crate::ack::{AckPropagator, AckReceipt};
use crate::config::{MeshConfig, MAX_EXPIRY_HOURS};
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::types::{
    CreateDistressMessageInput, MaintenanceReport, MeshStats, RegisterDeviceInput,
};
use crate::metrics::recorder;
use crate::model::{
    Clock, DeviceId, DeviceNode, DistressMessage, Location, MessageCategory, MessageRoute,
    SystemClock, Urgency,
};
use crate::persistence::MeshArchive;
use crate::reaper::ExpiryReaper;
use crate::registry::{DeviceRegistry, DeviceUpdate, RegistryEvent};
use crate::routing::{
    PeerTransport, RelayPool, RelayReport, RouteLog, RoutingEngine,
};
use crate::store::{AdmitOutcome, MessageFilter, MessageStore};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Facade over one mesh: its registry, store, route log and the components
/// that act on them. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct MeshCoordinator {
    config: Arc<MeshConfig>,
    clock: Arc<dyn Clock>,
    store: Arc<MessageStore>,
    registry: Arc<DeviceRegistry>,
    routes: Arc<RouteLog>,
    engine: Arc<RoutingEngine>,
    pool: Arc<RelayPool>,
    acks: Arc<AckPropagator>,
    reaper: Arc<ExpiryReaper>,
    archive: Option<Arc<MeshArchive>>,
}

impl MeshCoordinator {
    pub fn new(
        config: MeshConfig,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
        archive: Option<MeshArchive>,
    ) -> Self {
        let archive = archive.map(Arc::new);
        let store = Arc::new(MessageStore::new());
        let registry = Arc::new(DeviceRegistry::new(config.registry.clone(), clock.clone()));
        let routes = Arc::new(RouteLog::new());

        let engine = Arc::new(RoutingEngine::new(
            config.routing.clone(),
            store.clone(),
            registry.clone(),
            routes.clone(),
            transport,
            clock.clone(),
        ));
        let pool = Arc::new(RelayPool::new(engine.clone()));
        let acks = Arc::new(AckPropagator::new(
            store.clone(),
            routes.clone(),
            registry.clone(),
        ));

        let mut reaper = ExpiryReaper::new(store.clone(), clock.clone(), config.reaper.clone());
        if let Some(archive) = &archive {
            reaper = reaper.with_archive(archive.clone());
        }

        Self {
            config: Arc::new(config),
            clock,
            store,
            registry,
            routes,
            engine,
            pool,
            acks,
            reaper: Arc::new(reaper),
            archive,
        }
    }

    /// Build a node from configuration: system clock, the configured archive
    /// (if any) and the state restored from it
    pub async fn open(
        config: MeshConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> CoordinatorResult<Self> {
        let archive = match &config.archive {
            Some(archive_config) => Some(MeshArchive::from_config(archive_config).await?),
            None => None,
        };
        let coordinator = Self::new(config, transport, Arc::new(SystemClock), archive);
        coordinator.restore().await?;
        Ok(coordinator)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn routes(&self) -> &Arc<RouteLog> {
        &self.routes
    }

    pub fn engine(&self) -> &Arc<RoutingEngine> {
        &self.engine
    }

    pub fn acks(&self) -> &Arc<AckPropagator> {
        &self.acks
    }

    // ============== Messages ==============

    /// Create a message on its origin device and, when configured, relay it
    /// from there straight away
    pub async fn create_distress_message(
        &self,
        input: CreateDistressMessageInput,
    ) -> CoordinatorResult<DistressMessage> {
        let content = input.content.trim();
        if content.is_empty() {
            return Err(CoordinatorError::InvalidInput("content must not be empty".into()));
        }
        if input.sender_id.trim().is_empty() {
            return Err(CoordinatorError::InvalidInput("senderId must not be empty".into()));
        }
        if input.origin_device_id.trim().is_empty() {
            return Err(CoordinatorError::InvalidInput(
                "originDeviceId must not be empty".into(),
            ));
        }

        let category: MessageCategory = input.message_type.parse()?;
        let urgency: Urgency = input.urgency_level.parse()?;
        let location = Location::from(input.location);
        location.validate()?;

        let now = self.clock.now();
        let expires_at = match input.expires_in.or(self.config.default_expiry_hours) {
            Some(hours) if hours.is_finite() && hours > 0.0 && hours <= MAX_EXPIRY_HOURS => {
                let expires_at = chrono::Duration::try_milliseconds((hours * 3_600_000.0) as i64)
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        CoordinatorError::InvalidInput(format!(
                            "expiresIn of {hours} hours is out of range"
                        ))
                    })?;
                Some(expires_at)
            }
            Some(hours) => {
                return Err(CoordinatorError::InvalidInput(format!(
                    "expiresIn must be a positive number of hours up to {MAX_EXPIRY_HOURS}, got {hours}"
                )))
            }
            None => None,
        };

        let message = DistressMessage::new(
            uuid::Uuid::new_v4().to_string(),
            input.sender_id,
            input.origin_device_id,
            category,
            urgency,
            content,
            location,
            now,
            expires_at,
        )?;
        let message_id = message.id.clone();
        let origin = message.origin_device_id.clone();

        self.store.admit(message)?;
        self.archive_message(&message_id).await;

        if self.config.routing.forward_immediately && self.registry.is_reachable(&origin) {
            if let Err(e) = self.relay(&message_id, &origin).await {
                tracing::warn!(message_id = %message_id, "Immediate relay failed: {e}");
            }
        }

        self.get_message(&message_id)
    }

    /// Accept a message that arrived from another mesh segment. A message
    /// already known here is a duplicate and leaves the stored copy untouched.
    pub async fn ingest(&self, message: DistressMessage) -> CoordinatorResult<AdmitOutcome> {
        message.location.validate()?;
        let message_id = message.id.clone();
        let outcome = self.store.admit(message)?;
        if outcome == AdmitOutcome::Admitted {
            self.archive_message(&message_id).await;
        }
        Ok(outcome)
    }

    pub fn get_message(&self, message_id: &str) -> CoordinatorResult<DistressMessage> {
        self.store
            .get(message_id)
            .ok_or_else(|| CoordinatorError::MessageNotFound(message_id.to_string()))
    }

    pub fn list_messages(&self, filter: &MessageFilter) -> Vec<DistressMessage> {
        self.store.list(filter)
    }

    pub fn list_messages_near(
        &self,
        center: &Location,
        radius_km: f64,
    ) -> CoordinatorResult<Vec<DistressMessage>> {
        center.validate()?;
        if !(radius_km.is_finite() && radius_km >= 0.0) {
            return Err(CoordinatorError::InvalidInput(format!(
                "radius must be a non-negative number of kilometres, got {radius_km}"
            )));
        }
        Ok(self.store.list_near(center, radius_km))
    }

    /// Hops of a message ordered by hop count
    pub fn get_message_routes(&self, message_id: &str) -> CoordinatorResult<Vec<MessageRoute>> {
        if !self.store.contains(message_id) {
            return Err(CoordinatorError::MessageNotFound(message_id.to_string()));
        }
        Ok(self.routes.routes_for(message_id))
    }

    pub async fn submit_acknowledgment(
        &self,
        message_id: &str,
        device_id: &str,
    ) -> CoordinatorResult<AckReceipt> {
        let receipt = self.acks.submit(message_id, device_id)?;
        self.engine.release(message_id);
        self.archive_message(message_id).await;
        recorder::set_active_messages(self.store.stats().active());
        Ok(receipt)
    }

    // ============== Relay ==============

    pub async fn relay(&self, message_id: &str, holder: &str) -> CoordinatorResult<RelayReport> {
        let report = self.engine.relay(message_id, holder).await?;
        self.archive_report(&report).await;
        Ok(report)
    }

    /// Relay every active message from every online holder
    pub async fn relay_pending(&self) -> Vec<RelayReport> {
        let reports = self.pool.run_pending().await;
        for report in &reports {
            self.archive_report(report).await;
        }
        reports
    }

    /// Expire overdue messages now
    pub async fn reap_expired(&self) -> usize {
        self.reaper.sweep().await
    }

    /// Sweep stale devices offline, reap expired messages, then retry every
    /// held message
    pub async fn maintenance_cycle(&self) -> MaintenanceReport {
        let stale_devices = self.registry.mark_stale_offline(self.clock.now());
        for device_id in &stale_devices {
            self.archive_device(device_id).await;
        }

        let reaped = self.reaper.sweep().await;
        let reports = self.relay_pending().await;
        let hops_recorded = reports.iter().map(|r| r.outcome.routes().len()).sum();
        let released = self.engine.prune_locks();
        if released > 0 {
            tracing::debug!(released, "Released relay locks of finished messages");
        }

        let report = MaintenanceReport {
            stale_devices,
            reaped,
            relay_decisions: reports.len(),
            hops_recorded,
        };
        if report.hops_recorded > 0 || report.reaped > 0 || !report.stale_devices.is_empty() {
            tracing::info!(
                stale = report.stale_devices.len(),
                reaped = report.reaped,
                hops = report.hops_recorded,
                "Maintenance cycle"
            );
        }
        report
    }

    // ============== Devices ==============

    pub async fn register_device(&self, input: RegisterDeviceInput) -> CoordinatorResult<DeviceNode> {
        if input.device_id.trim().is_empty() {
            return Err(CoordinatorError::InvalidInput("deviceId must not be empty".into()));
        }
        let location = input.location.map(Location::from);
        if let Some(location) = &location {
            location.validate()?;
        }

        let previous_peers = self
            .registry
            .get(&input.device_id)
            .map(|node| node.connected_peers)
            .unwrap_or_default();

        let update = DeviceUpdate {
            device_id: input.device_id,
            user_id: input.user_id,
            location,
            online: input.is_online,
            peers: input.connected_peers,
            queue_size: input.message_queue_size,
        };
        let node = self.registry.register_or_update(update);

        if self.archive.is_some() {
            self.archive_device(&node.device_id).await;
            for peer in previous_peers.union(&node.connected_peers) {
                self.archive_device(peer).await;
            }
        }
        Ok(node)
    }

    pub async fn heartbeat(&self, device_id: &str) -> CoordinatorResult<DeviceNode> {
        if !self.registry.contains(device_id) {
            return Err(CoordinatorError::DeviceNotFound(device_id.to_string()));
        }
        let node = self.registry.heartbeat(device_id);
        self.archive_device(device_id).await;
        Ok(node)
    }

    pub async fn set_device_offline(&self, device_id: &str) -> CoordinatorResult<DeviceNode> {
        let previous_peers = self
            .registry
            .get(device_id)
            .map(|node| node.connected_peers)
            .ok_or_else(|| CoordinatorError::DeviceNotFound(device_id.to_string()))?;

        let node = self.registry.set_offline(device_id);
        self.archive_device(device_id).await;
        for peer in &previous_peers {
            self.archive_device(peer).await;
        }
        Ok(node)
    }

    pub fn get_device(&self, device_id: &str) -> CoordinatorResult<DeviceNode> {
        self.registry
            .get(device_id)
            .ok_or_else(|| CoordinatorError::DeviceNotFound(device_id.to_string()))
    }

    /// Devices owned by a user
    pub fn list_devices(&self) -> Vec<DeviceNode> {
        self.registry.listed_devices()
    }

    pub fn neighbors_of(&self, device_id: &str) -> Vec<DeviceId> {
        self.registry.neighbors_of(device_id)
    }

    pub fn stats(&self) -> MeshStats {
        MeshStats {
            messages: self.store.stats(),
            routing: self.engine.stats(),
            known_devices: self.registry.len(),
            online_devices: self.registry.online_count(),
        }
    }

    // ============== Background ==============

    /// Start the expiry reaper, the periodic maintenance cycle and the
    /// listener that retries held messages when devices link up
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let reaper = self.reaper.clone().spawn(shutdown.clone());

        let coordinator = self.clone();
        let mut maintenance_shutdown = shutdown.clone();
        let maintenance = tokio::spawn(async move {
            let mut tick = tokio::time::interval(coordinator.config.node.maintenance_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        coordinator.maintenance_cycle().await;
                    }
                    changed = maintenance_shutdown.changed() => {
                        if changed.is_err() || *maintenance_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let coordinator = self.clone();
        let mut events = self.registry.subscribe();
        let mut link_shutdown = shutdown;
        let links = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => coordinator.on_registry_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Registry events lagged, retrying all held messages");
                            coordinator.relay_pending().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = link_shutdown.changed() => {
                        if changed.is_err() || *link_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        vec![reaper, maintenance, links]
    }

    async fn on_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::PeerLinked { device_id, peer_id } => {
                let jobs = self.engine.jobs_for_holder(&device_id);
                if jobs.is_empty() {
                    return;
                }
                tracing::debug!(
                    device = %device_id,
                    peer = %peer_id,
                    held = jobs.len(),
                    "New link, retrying held messages"
                );
                for report in self.pool.run(jobs).await {
                    self.archive_report(&report).await;
                }
            }
            RegistryEvent::WentOffline { device_id } => {
                tracing::debug!(device = %device_id, "Device left the mesh");
            }
        }
    }

    // ============== Archive ==============

    /// Reload devices, messages and routes from the archive. Records already
    /// in memory win.
    pub async fn restore(&self) -> CoordinatorResult<()> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };

        let snapshot = archive.load_snapshot().await?;
        let (devices, messages, routes) = (
            snapshot.devices.len(),
            snapshot.messages.len(),
            snapshot.routes.len(),
        );

        for device in snapshot.devices {
            if !self.registry.contains(&device.device_id) {
                self.registry.restore(device);
            }
        }
        for message in snapshot.messages {
            self.store.admit(message)?;
        }
        for route in snapshot.routes {
            if let Err(e) = self.routes.append(route) {
                tracing::warn!("Skipping archived route: {e}");
            }
        }

        tracing::info!(devices, messages, routes, "Restored mesh state from archive");
        recorder::set_online_devices(self.registry.online_count());
        recorder::set_active_messages(self.store.stats().active());
        Ok(())
    }

    async fn archive_message(&self, message_id: &str) {
        let Some(archive) = &self.archive else {
            return;
        };
        let Some(message) = self.store.get(message_id) else {
            return;
        };
        if let Err(e) = archive.save_message(&message).await {
            tracing::warn!(message_id = %message_id, "Failed to archive message: {e}");
        }
    }

    async fn archive_device(&self, device_id: &str) {
        let Some(archive) = &self.archive else {
            return;
        };
        let Some(device) = self.registry.get(device_id) else {
            return;
        };
        if let Err(e) = archive.save_device(&device).await {
            tracing::warn!(device = %device_id, "Failed to archive device: {e}");
        }
    }

    async fn archive_report(&self, report: &RelayReport) {
        let Some(archive) = &self.archive else {
            return;
        };
        for route in report.outcome.routes() {
            if let Err(e) = archive.append_route(route).await {
                tracing::warn!(route = %route.id, "Failed to archive route: {e}");
            }
            self.archive_device(&route.to_device_id).await;
        }
        self.archive_message(&report.message_id).await;
    }
}
