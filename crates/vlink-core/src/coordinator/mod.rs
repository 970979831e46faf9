//! Data coordinator
//!
//! Owns the session control flow: one-time setup with capability probing,
//! the fan-out/fan-in poll cycle, the independent token-refresh and daily
//! quota-reset schedules, and remote command execution. Consumers read the
//! published snapshot through a watch channel.

pub mod plan;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::VehicleApi;
use crate::auth::AuthClient;
use crate::error::{VlinkError, VlinkResult};
use crate::models::{
    Authorization, CommandResult, FieldNode, PlainValue, Snapshot, Vehicle,
};
use crate::store::{SessionRecord, SharedStore};

pub use plan::{Capabilities, PollCall, build_plan, subsystem_supported};

/// Overall ceiling for one fan-out cycle.
const CYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cadence of the background token refresh.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// Snapshot key for the synthesized battery-capacity field.
pub const FIELD_BATTERY_CAPACITY: &str = "batteryCapacityKWH";

/// Snapshot key for the synthesized request-quota field.
pub const FIELD_REQUEST_COUNT: &str = "apiRequestCount";

/// Orchestrates polling, token refresh, and command execution for one
/// vehicle session.
pub struct Coordinator {
    api: Arc<VehicleApi>,
    auth: AuthClient,
    store: Arc<SharedStore>,
    vehicle: Vehicle,
    capabilities: Capabilities,
    commands: Vec<String>,
    poll_interval: Duration,
    engine_run_time_minutes: u16,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    in_flight: Mutex<HashSet<String>>,
}

impl Coordinator {
    /// Set up a session: load the persisted record, fetch the immutable
    /// vehicle facts, and probe the optional subsystems once.
    ///
    /// A missing vehicle descriptor aborts initialization. The probe calls
    /// are credited to the persisted request quota.
    pub async fn start(
        api: Arc<VehicleApi>,
        auth: AuthClient,
        store: Arc<SharedStore>,
    ) -> VlinkResult<Arc<Self>> {
        let record = store.load().await?.ok_or(VlinkError::StorageMissing)?;

        let vehicle = api.get_vehicle().await.map_err(|error| match error {
            VlinkError::Auth(_) => error,
            other => VlinkError::not_ready(format!("vehicle details unavailable: {other}")),
        })?;
        info!(
            model = %vehicle.description.model,
            year = vehicle.model_year,
            fuel = %vehicle.fuel_type,
            "vehicle descriptor loaded"
        );

        let commands: Vec<String> = api
            .get_commands()
            .await
            .map_err(|error| match error {
                VlinkError::Auth(_) => error,
                other => VlinkError::not_ready(format!("command list unavailable: {other}")),
            })?
            .into_iter()
            .map(|command| command.command)
            .collect();
        debug!(count = commands.len(), "available commands loaded");

        let mut capabilities = Capabilities::default();
        let mut probe_calls = 0u64;

        probe_calls += 1;
        capabilities.supports_doors = Self::evaluate_probe(
            "doors",
            api.get_doors_status().await,
            &mut capabilities.unsupported_keys,
        )?;
        probe_calls += 1;
        capabilities.supports_tyres = Self::evaluate_probe(
            "tyres",
            api.get_tyre_states().await,
            &mut capabilities.unsupported_keys,
        )?;
        probe_calls += 1;
        capabilities.supports_warnings = Self::evaluate_probe(
            "warnings",
            api.get_warnings().await,
            &mut capabilities.unsupported_keys,
        )?;
        probe_calls += 1;
        capabilities.supports_windows = Self::evaluate_probe(
            "windows",
            api.get_window_states().await,
            &mut capabilities.unsupported_keys,
        )?;

        // The location payload has no scalar field map; it is supported
        // when the probe reports actual coordinates.
        probe_calls += 1;
        capabilities.supports_location = match api.get_location().await {
            Ok(fields) => matches!(
                fields.get("location"),
                Some(FieldNode::Location(location))
                    if !location.geometry.coordinates.is_empty()
            ),
            Err(VlinkError::Auth(message)) => return Err(VlinkError::Auth(message)),
            Err(error) => {
                warn!("capability probe for location failed: {error}");
                false
            }
        };

        store.add_api_calls(probe_calls).await?;
        info!(
            doors = capabilities.supports_doors,
            location = capabilities.supports_location,
            tyres = capabilities.supports_tyres,
            warnings = capabilities.supports_warnings,
            windows = capabilities.supports_windows,
            "capability probing finished"
        );

        Ok(Self::from_parts(
            api,
            auth,
            store,
            vehicle,
            capabilities,
            commands,
            &record,
        ))
    }

    fn from_parts(
        api: Arc<VehicleApi>,
        auth: AuthClient,
        store: Arc<SharedStore>,
        vehicle: Vehicle,
        capabilities: Capabilities,
        commands: Vec<String>,
        record: &SessionRecord,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::new()));
        Arc::new(Self {
            api,
            auth,
            store,
            vehicle,
            capabilities,
            commands,
            poll_interval: Duration::from_secs(record.poll_interval_seconds),
            engine_run_time_minutes: record.engine_run_time_minutes,
            snapshot_tx,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    fn evaluate_probe(
        subsystem: &str,
        result: VlinkResult<HashMap<String, FieldNode>>,
        unsupported_keys: &mut HashSet<String>,
    ) -> VlinkResult<bool> {
        match result {
            Ok(fields) => {
                for (key, node) in &fields {
                    if !plan::field_supported(node) {
                        unsupported_keys.insert(key.clone());
                    }
                }
                Ok(plan::subsystem_supported(&fields))
            }
            Err(VlinkError::Auth(message)) => Err(VlinkError::Auth(message)),
            Err(error) => {
                warn!("capability probe for {subsystem} failed: {error}");
                Ok(false)
            }
        }
    }

    /// Run one poll cycle and publish the merged snapshot.
    ///
    /// All planned calls run concurrently and the cycle blocks until every
    /// one resolves or the 30 s ceiling elapses. A failed or timed-out
    /// cycle publishes nothing; the previous snapshot stays authoritative.
    pub async fn refresh(&self) -> VlinkResult<Arc<Snapshot>> {
        let plan = plan::build_plan(&self.vehicle, &self.capabilities);
        let counted = plan
            .iter()
            .filter(|call| call.counts_against_quota())
            .count() as u64;

        debug!(calls = plan.len(), "poll cycle starting");
        let calls: Vec<_> = plan.iter().map(|call| self.dispatch(*call)).collect();
        let joined = tokio::time::timeout(CYCLE_TIMEOUT, try_join_all(calls)).await;

        let fragments = match joined {
            Err(_) => return Err(VlinkError::update("poll cycle timed out")),
            Ok(Err(VlinkError::Auth(message))) => {
                error!("authentication failed during poll cycle");
                return Err(VlinkError::Auth(message));
            }
            Ok(Err(error)) => {
                return Err(VlinkError::update(format!("poll cycle failed: {error}")));
            }
            Ok(Ok(fragments)) => fragments,
        };

        // Merge in plan order; a later call wins on a key collision.
        let mut snapshot = Snapshot::new();
        for fragment in fragments {
            snapshot.extend(fragment);
        }

        if let Some(capacity) = self.vehicle.battery_capacity_kwh {
            snapshot.insert(
                FIELD_BATTERY_CAPACITY.to_string(),
                FieldNode::Plain(PlainValue::new(capacity)),
            );
        }

        let total = self.store.add_api_calls(counted).await?;
        snapshot.insert(
            FIELD_REQUEST_COUNT.to_string(),
            FieldNode::Plain(PlainValue::new(total)),
        );

        let snapshot = Arc::new(snapshot);
        self.snapshot_tx.send_replace(snapshot.clone());
        debug!(fields = snapshot.len(), "snapshot published");
        Ok(snapshot)
    }

    async fn dispatch(&self, call: PollCall) -> VlinkResult<HashMap<String, FieldNode>> {
        match call {
            PollCall::ApiStatus => self.api.get_api_status().await,
            PollCall::Availability => self.api.get_availability_status().await,
            PollCall::Brakes => self.api.get_brakes_status().await,
            PollCall::Diagnostics => self.api.get_diagnostics().await,
            PollCall::EngineStatus => self.api.get_engine_status().await,
            PollCall::EngineWarnings => self.api.get_engine_warnings().await,
            PollCall::Odometer => self.api.get_odometer().await,
            PollCall::Statistics => self.api.get_statistics().await,
            PollCall::FuelStatus => self.api.get_fuel_status().await,
            PollCall::RechargeStatus => self.api.get_recharge_status().await,
            PollCall::Doors => self.api.get_doors_status().await,
            PollCall::Location => self.api.get_location().await,
            PollCall::Tyres => self.api.get_tyre_states().await,
            PollCall::Warnings => self.api.get_warnings().await,
            PollCall::Windows => self.api.get_window_states().await,
        }
    }

    /// Refresh the access token from the persisted refresh token.
    ///
    /// A missing record is a no-op. A rejected token is fatal; transient
    /// failures leave the record untouched for the next scheduled tick.
    pub async fn refresh_token(&self) -> VlinkResult<()> {
        let Some(record) = self.store.load().await? else {
            warn!("session record missing; skipping token refresh");
            return Ok(());
        };

        match self.auth.refresh_token(&record.refresh_token).await? {
            Authorization::Completed { token } => {
                self.store
                    .save_tokens(&token.access_token, &token.refresh_token)
                    .await?;
                self.api.update_access_token(&token.access_token);
                debug!("access token refreshed");
                Ok(())
            }
            _ => Err(VlinkError::auth(
                "token refresh ended in an unexpected flow state",
            )),
        }
    }

    /// Zero the persisted request counter and republish the snapshot.
    pub async fn reset_request_count(&self) -> VlinkResult<()> {
        self.store.reset_api_calls().await?;

        let mut snapshot = self.snapshot_tx.borrow().as_ref().clone();
        snapshot.insert(
            FIELD_REQUEST_COUNT.to_string(),
            FieldNode::Plain(PlainValue::new(0u64)),
        );
        self.snapshot_tx.send_replace(Arc::new(snapshot));

        info!("daily request counter reset");
        Ok(())
    }

    /// Drive the poll, token-refresh, and quota-reset schedules until the
    /// token is cancelled. Authentication failures stop the loop.
    ///
    /// The poll cycle runs inline in its timer arm, so a cycle still in
    /// flight is never re-entered; a missed tick is coalesced.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> VlinkResult<()> {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let first_refresh = tokio::time::Instant::now() + TOKEN_REFRESH_INTERVAL;
        let mut token_refresh =
            tokio::time::interval_at(first_refresh, TOKEN_REFRESH_INTERVAL);
        token_refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.poll_interval, "coordinator running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("coordinator stopped");
                    return Ok(());
                }
                _ = poll.tick() => {
                    match self.refresh().await {
                        Ok(_) => {}
                        Err(error @ VlinkError::Auth(_)) => {
                            error!("authentication failed; interactive re-login required");
                            return Err(error);
                        }
                        Err(error) => {
                            warn!("update failed, keeping previous snapshot: {error}");
                        }
                    }
                }
                _ = token_refresh.tick() => {
                    match self.refresh_token().await {
                        Ok(()) => {}
                        Err(error @ VlinkError::Auth(_)) => {
                            error!("authentication failed; interactive re-login required");
                            return Err(error);
                        }
                        Err(error) => {
                            warn!("token refresh failed, retrying on next tick: {error}");
                        }
                    }
                }
                _ = Self::sleep_until_utc_midnight() => {
                    if let Err(error) = self.reset_request_count().await {
                        warn!("daily request counter reset failed: {error}");
                    }
                }
            }
        }
    }

    async fn sleep_until_utc_midnight() {
        let elapsed = u64::from(Utc::now().time().num_seconds_from_midnight());
        let remaining = 86_400_u64.saturating_sub(elapsed).max(1);
        tokio::time::sleep(Duration::from_secs(remaining)).await;
    }

    /// Execute a remote command.
    ///
    /// On a terminal success status the affected snapshot field is updated
    /// optimistically; any other terminal status surfaces as
    /// [`VlinkError::CommandFailed`] with the server's message, leaving the
    /// snapshot untouched.
    pub async fn execute_command(&self, command: &str) -> VlinkResult<CommandResult> {
        self.in_flight.lock().insert(command.to_string());
        let result = self.execute_command_inner(command).await;
        self.in_flight.lock().remove(command);
        result
    }

    async fn execute_command_inner(&self, command: &str) -> VlinkResult<CommandResult> {
        let body = (command == "engine-start")
            .then(|| json!({ "runtimeMinutes": self.engine_run_time_minutes }));

        let result = self.api.execute_command(command, body).await?;
        debug!("command '{command}' result: {}", result.invoke_status);

        if matches!(result.invoke_status.as_str(), "COMPLETED" | "DELIVERED") {
            self.apply_command_effect(command);
            Ok(result)
        } else {
            Err(VlinkError::CommandFailed {
                command: command.to_string(),
                status: result.invoke_status.clone(),
                message: result.message.clone(),
            })
        }
    }

    /// Locking commands reflect in the snapshot immediately; the next poll
    /// cycle confirms the server-side state.
    fn apply_command_effect(&self, command: &str) {
        let (field, value) = match command {
            "lock" | "lock-reduced-guard" => ("centralLock", "LOCKED"),
            "unlock" => ("centralLock", "UNLOCKED"),
            _ => return,
        };

        let mut snapshot = self.snapshot_tx.borrow().as_ref().clone();
        match snapshot.get_mut(field) {
            Some(FieldNode::Timestamped(node)) => node.value = value.into(),
            Some(FieldNode::Plain(node)) => node.value = value.into(),
            _ => {
                snapshot.insert(field.to_string(), FieldNode::Plain(PlainValue::new(value)));
            }
        }
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    /// Whether a command is currently being executed.
    pub fn is_command_in_progress(&self, command: &str) -> bool {
        self.in_flight.lock().contains(command)
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Commands the vehicle accepts, as reported at setup.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
