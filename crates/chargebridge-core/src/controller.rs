// ── Controller ──
//
// Lifecycle of one station: authentication, service-location resolution,
// store seeding, one command worker per connector, the poll loop and the
// realtime loop. Every background task of a connection runs under one
// session token so disconnect and reload cancel them together.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chargebridge_api::models::ServiceLocation as CloudLocation;
use chargebridge_api::{CloudClient, Credentials, MqttFeedConfig, OAuthClient, RealtimeHandle};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::gateway::CommandGateway;
use crate::model::{Capabilities, ConnectorId, ConnectorIdentity, ConnectorSnapshot, StaleStateWarning};
use crate::reconcile::poll::poll_loop;
use crate::reconcile::realtime::{feed_grace, metering_channels, realtime_loop};
use crate::reconcile::{PollReconciler, PollReport, RealtimeReconciler, discover_connectors};
use crate::store::{RealtimeHealth, StateStore};
use crate::stream::SnapshotStream;
use crate::token::TokenManager;

const COMMAND_CHANNEL_SIZE: usize = 16;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reloading,
    Failed,
}

// ── Per-connector workers ────────────────────────────────────────────

struct CommandEnvelope {
    command: Command,
    /// Held until the command finishes; a second caller fails fast on it.
    in_flight: OwnedMutexGuard<()>,
    response_tx: oneshot::Sender<Result<(), CoreError>>,
}

struct Worker {
    tx: mpsc::Sender<CommandEnvelope>,
    in_flight: Arc<Mutex<()>>,
}

struct Session {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    background: bool,
}

// ── Controller ───────────────────────────────────────────────────────

/// The entry point for consumers. Cheaply cloneable.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: BridgeConfig,
    store: Arc<StateStore>,
    tokens: Arc<TokenManager>,
    gateway: Arc<CommandGateway>,
    poller: Arc<PollReconciler>,
    realtime: Arc<RealtimeReconciler>,
    connection_state: watch::Sender<ConnectionState>,
    workers: ArcSwap<HashMap<ConnectorId, Worker>>,
    session: Mutex<Option<Session>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Build the component graph. Does not touch the network; call
    /// [`connect`](Self::connect) to authenticate and start.
    pub fn new(config: BridgeConfig) -> Result<Self, CoreError> {
        let oauth = OAuthClient::new(config.endpoints.token_url.clone(), &config.transport)?;
        let client = CloudClient::new(
            config.endpoints.api_base.clone(),
            config.service_location.id.clone().unwrap_or_default(),
            &config.transport,
        )?;

        let store = Arc::new(StateStore::new(config.tick_window()));
        let tokens = Arc::new(TokenManager::new(
            oauth,
            config.credentials.clone(),
            config.token,
        ));
        let gateway = Arc::new(CommandGateway::new(
            client,
            Arc::clone(&tokens),
            config.retry,
        ));
        let poller = Arc::new(PollReconciler::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            config.stale_after_failures,
        ));
        let realtime = Arc::new(RealtimeReconciler::new(Arc::clone(&store)));
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                store,
                tokens,
                gateway,
                poller,
                realtime,
                connection_state,
                workers: ArcSwap::from_pointee(HashMap::new()),
                session: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Authenticate, seed the store, run the first poll and start every
    /// background task. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.start(true).await
    }

    /// Cancel every background task and in-flight command, then wait for
    /// them to finish. Cached state is kept until the next connect.
    pub async fn disconnect(&self) {
        self.stop().await;
        self.set_state(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Tear down all per-connector state and subscriptions, then build
    /// them again from the vendor.
    pub async fn reload(&self) -> Result<(), CoreError> {
        info!("reloading");
        self.set_state(ConnectionState::Reloading);
        let background = self.stop().await.unwrap_or(true);
        self.start(background).await
    }

    /// Connect without the poll and realtime loops, run `f`, disconnect.
    pub async fn oneshot<F, Fut, T>(config: BridgeConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let controller = Controller::new(config)?;
        controller.start(false).await?;
        let result = f(controller.clone()).await;
        controller.disconnect().await;
        result
    }

    /// Replace the stored credentials, clearing a pending reauthentication.
    pub async fn update_credentials(&self, credentials: Credentials) {
        self.inner.tokens.update_credentials(credentials).await;
    }

    async fn start(&self, background: bool) -> Result<(), CoreError> {
        let mut session = self.inner.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        let location_uuid = match self.bootstrap().await {
            Ok(uuid) => uuid,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }
        };

        let cancel = self.inner.cancel.child_token();
        let mut handles = self.spawn_workers(&cancel);

        if background {
            let period = self.inner.config.effective_poll_interval();
            handles.push(tokio::spawn(poll_loop(
                Arc::clone(&self.inner.poller),
                period,
                cancel.clone(),
            )));

            match (self.inner.config.realtime.enabled, location_uuid) {
                (true, Some(uuid)) => {
                    self.load_metering().await;
                    let feed = RealtimeHandle::connect(
                        self.feed_config(uuid),
                        self.inner.config.realtime.reconnect.clone(),
                        cancel.child_token(),
                    );
                    handles.push(tokio::spawn(realtime_loop(
                        Arc::clone(&self.inner.realtime),
                        feed,
                        feed_grace(self.inner.config.realtime.tracking_interval),
                        cancel.clone(),
                    )));
                }
                (true, None) => warn!("service location UUID unknown, realtime feed disabled"),
                (false, _) => debug!("realtime feed disabled by configuration"),
            }
        }

        *session = Some(Session {
            cancel,
            handles,
            background,
        });
        self.set_state(ConnectionState::Connected);
        info!(connectors = self.inner.store.len(), "connected");
        Ok(())
    }

    /// Cancel and join the current session. Returns whether it ran the
    /// background loops, or `None` if there was no session.
    async fn stop(&self) -> Option<bool> {
        let session = self.inner.session.lock().await.take()?;
        session.cancel.cancel();
        self.inner.workers.store(Arc::new(HashMap::new()));
        for handle in session.handles {
            let _ = handle.await;
        }
        Some(session.background)
    }

    /// Everything `connect` does before spawning tasks. Returns the
    /// service location UUID when known.
    async fn bootstrap(&self) -> Result<Option<String>, CoreError> {
        let config = &self.inner.config;
        self.inner.tokens.get_valid_token().await?;
        debug!("authenticated");

        let location_uuid = self.resolve_service_location().await?;

        self.inner.store.clear();
        self.inner.poller.reset();
        self.inner.realtime.reset();
        self.inner
            .gateway
            .set_led_device(config.station.led_device_uuid.clone());

        let identities = if config.station.connectors.is_empty() {
            let devices = self.inner.gateway.list_devices().await?;
            let found = discover_connectors(&devices, &config.station.serial);
            info!(count = found.len(), "discovered connectors");
            found
        } else {
            config.station.identities()
        };
        if identities.is_empty() {
            warn!(serial = %config.station.serial, "station has no connectors");
        }
        self.seed(identities);

        let report = self.inner.poller.poll_once().await;
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "initial poll incomplete");
        }
        Ok(location_uuid)
    }

    fn seed(&self, identities: Vec<(ConnectorIdentity, Capabilities)>) {
        let firmware = self.inner.config.station.firmware;
        for (identity, capabilities) in identities {
            self.inner.store.register(identity, capabilities, firmware);
        }
    }

    /// Map charger channels for `power` messages. Without it the feed
    /// still runs, just without metering.
    async fn load_metering(&self) {
        match self.inner.gateway.fetch_metering_configuration().await {
            Ok(config) => {
                let channels = metering_channels(&config);
                info!(chargers = channels.len(), "metering channels loaded");
                self.inner.realtime.set_metering_channels(channels);
            }
            Err(e) => warn!(error = %e, "metering configuration unavailable, power readings disabled"),
        }
    }

    /// Fill in whichever of id and UUID the configuration left out.
    async fn resolve_service_location(&self) -> Result<Option<String>, CoreError> {
        let configured = &self.inner.config.service_location;
        if let (Some(id), Some(uuid)) = (&configured.id, &configured.uuid) {
            self.inner.gateway.set_service_location(id);
            return Ok(Some(uuid.clone()));
        }

        let locations = self.inner.gateway.list_service_locations().await?;
        let serial = &self.inner.config.station.serial;
        let chosen = pick_location(&locations, configured.id.as_deref(), configured.uuid.as_deref(), serial)
            .ok_or_else(|| CoreError::Config {
                message: format!(
                    "cannot determine the service location for station {serial} ({} on account)",
                    locations.len()
                ),
            })?;

        let id = configured
            .id
            .clone()
            .or_else(|| location_id(chosen))
            .ok_or_else(|| CoreError::Api {
                message: "service location without id".into(),
            })?;
        let uuid = configured
            .uuid
            .clone()
            .or_else(|| chosen.service_location_uuid.clone());
        info!(service_location = %id, "service location resolved");
        self.inner.gateway.set_service_location(&id);
        Ok(uuid)
    }

    fn spawn_workers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut workers = HashMap::new();
        let mut handles = Vec::new();
        for id in self.inner.store.ids() {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            handles.push(tokio::spawn(connector_worker(
                id.clone(),
                Arc::clone(&self.inner.store),
                Arc::clone(&self.inner.gateway),
                rx,
                cancel.clone(),
            )));
            workers.insert(
                id,
                Worker {
                    tx,
                    in_flight: Arc::new(Mutex::new(())),
                },
            );
        }
        self.inner.workers.store(Arc::new(workers));
        handles
    }

    fn feed_config(&self, uuid: String) -> MqttFeedConfig {
        let config = &self.inner.config;
        MqttFeedConfig {
            host: config.endpoints.mqtt_host.clone(),
            port: config.endpoints.mqtt_port,
            tls: config.endpoints.mqtt_tls,
            service_location_uuid: uuid,
            service_location_id: self.inner.gateway.service_location_id(),
            client_id: config.realtime.client_id.clone(),
            serial_number: config.station.serial.clone(),
            keep_alive: config.realtime.keep_alive,
            tracking_interval: config.realtime.tracking_interval,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Run `command` on a connector and wait for it. Fails with `Busy`
    /// while another command for the same connector is in flight.
    pub async fn execute(&self, id: &ConnectorId, command: Command) -> Result<(), CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::Disconnected);
        }

        let (tx, in_flight) = {
            let workers = self.inner.workers.load();
            let worker = workers.get(id).ok_or_else(|| CoreError::not_found(id))?;
            let in_flight = Arc::clone(&worker.in_flight)
                .try_lock_owned()
                .map_err(|_| CoreError::Busy {
                    connector: id.clone(),
                })?;
            (worker.tx.clone(), in_flight)
        };

        let (response_tx, response_rx) = oneshot::channel();
        tx.send(CommandEnvelope {
            command,
            in_flight,
            response_tx,
        })
        .await
        .map_err(|_| CoreError::Disconnected)?;

        response_rx.await.map_err(|_| CoreError::Cancelled)?
    }

    /// Poll the station once, outside the regular schedule.
    pub async fn refresh(&self) -> PollReport {
        self.inner.poller.poll_once().await
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn realtime_health(&self) -> watch::Receiver<RealtimeHealth> {
        self.inner.store.realtime_health()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.inner.store.subscribe()
    }

    pub fn snapshots(&self) -> Arc<Vec<Arc<ConnectorSnapshot>>> {
        self.inner.store.snapshots()
    }

    pub fn snapshot(&self, id: &ConnectorId) -> Option<Arc<ConnectorSnapshot>> {
        self.inner.store.get(id)
    }

    /// Resolve the connector addressed by station serial and 1-based
    /// connector number.
    pub fn connector_by_serial(
        &self,
        serial: &str,
        connector_number: u32,
    ) -> Result<Arc<ConnectorSnapshot>, CoreError> {
        self.inner
            .store
            .snapshots()
            .iter()
            .find(|s| {
                s.identity.station_serial.eq_ignore_ascii_case(serial)
                    && s.identity.connector_number == connector_number
            })
            .cloned()
            .ok_or_else(|| CoreError::ConnectorNotFound {
                identifier: format!("{serial}#{connector_number}"),
            })
    }

    /// Connectors not confirmed by any source within `window`, or marked
    /// stale by the poller.
    pub fn stale_warnings(&self, window: std::time::Duration) -> Vec<StaleStateWarning> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.inner.store.stale_warnings(Utc::now(), window)
    }
}

// ── Location selection ───────────────────────────────────────────────

fn location_id(location: &CloudLocation) -> Option<String> {
    match &location.service_location_id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Match by configured id, then UUID, then station serial; fall back to
/// the only location on the account.
fn pick_location<'a>(
    locations: &'a [CloudLocation],
    id: Option<&str>,
    uuid: Option<&str>,
    serial: &str,
) -> Option<&'a CloudLocation> {
    if let Some(id) = id {
        return locations
            .iter()
            .find(|l| location_id(l).as_deref() == Some(id));
    }
    if let Some(uuid) = uuid {
        return locations
            .iter()
            .find(|l| l.service_location_uuid.as_deref() == Some(uuid));
    }
    let by_serial = locations.iter().find(|l| {
        !serial.is_empty()
            && l.device_serial_number
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(serial))
    });
    match (by_serial, locations) {
        (Some(found), _) => Some(found),
        (None, [only]) => Some(only),
        _ => None,
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Execute one connector's commands strictly in submission order.
async fn connector_worker(
    id: ConnectorId,
    store: Arc<StateStore>,
    gateway: Arc<CommandGateway>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(CommandEnvelope { command, in_flight, response_tx }) = envelope else {
                    break;
                };
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(CoreError::Cancelled),
                    result = run_command(&id, &store, &gateway, &command) => result,
                };
                if let Err(e) = &result {
                    warn!(connector = %id, command = command.name(), error = %e, "command failed");
                }
                drop(in_flight);
                let _ = response_tx.send(result);
            }
        }
    }
    debug!(connector = %id, "worker stopped");
}

/// Send the command, then apply its optimistic patch stamped with the
/// confirmation time. Nothing is applied unless every call succeeded.
async fn run_command(
    id: &ConnectorId,
    store: &StateStore,
    gateway: &CommandGateway,
    command: &Command,
) -> Result<(), CoreError> {
    let snapshot = store.get(id).ok_or_else(|| CoreError::not_found(id))?;
    gateway.execute(&snapshot, command).await?;

    let confirmed_at = Utc::now();
    let patch = command.optimistic_patch(&snapshot);
    if command.is_station_wide() {
        for other in store.ids() {
            if let Err(e) = store.apply_optimistic(&other, patch.clone(), confirmed_at) {
                debug!(connector = %other, error = %e, "optimistic update skipped");
            }
        }
    } else {
        store.apply_optimistic(id, patch, confirmed_at)?;
    }
    info!(connector = %id, command = command.name(), "command confirmed");
    Ok(())
}
