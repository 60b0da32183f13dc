//! The BLE session orchestrator
//!
//! Exactly one BLE session to one vehicle can exist at a time, and opening
//! one is expensive (scan, dial, handshake, wake). [`BleControl`] is the
//! single task that owns the session: HTTP handlers submit [`Command`]s
//! through a [`BleHandle`] and the loop multiplexes them onto a serial
//! sequence of sessions, keeping a session open for follow-up commands until
//! its lifetime expires or a command for another VIN arrives.
//!
//! Layered retry policy, mirroring the flakiness of the radio:
//!
//! - connect: 3 attempts, 15 s each, exponential backoff from 3 s
//! - per command: 3 attempts total (counted across session re-opens),
//!   exponential backoff from 3 s, interruptible
//! - a lost connection mid-command hands the command back to the outer loop,
//!   which re-opens a session and resumes it

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use fleetlink_core::command::{Command, CommandOutcome, CMD_CONNECTION_STATUS, CMD_VEHICLE_DATA};
use fleetlink_core::dispatch::SendEnv;
use fleetlink_core::error::{BridgeError, Result};
use fleetlink_core::vehicle::{
    Beacon, Domain, PrivateKeyPem, SleepStatus, VehicleConnector, VehicleHandle,
};

use crate::keystore::KeyStore;

/// Capacity of the buffered command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 50;
/// Pacing delay between scheduler iterations
pub const PACING_DELAY: Duration = Duration::from_secs(1);
/// Budget for one connection attempt (scan through handshake)
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
/// Connection attempts before giving up on a command's session
pub const CONNECT_RETRY_COUNT: u32 = 3;
/// Lifetime of one operated session
pub const SESSION_LIFETIME: Duration = Duration::from_secs(29);
/// Default deadline for a fire-and-forget command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Execution attempts per command, counted across session re-opens
pub const COMMAND_RETRY_COUNT: u32 = 3;
/// First backoff step; doubles per retry
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(3);
/// Inner timeout for the Infotainment handshake, which can hang on a slow
/// car instead of returning an error
pub const INFOTAINMENT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);
/// How long a confirmed-awake vehicle is trusted to still be awake
pub const AWAKE_GRACE: Duration = Duration::from_secs(9 * 60);

/// Cloneable submission handle to the orchestrator.
///
/// Dropping every handle closes the queues and stops the loop.
#[derive(Debug, Clone)]
pub struct BleHandle {
    command_tx: mpsc::Sender<Command>,
    priority_tx: mpsc::Sender<Command>,
}

impl BleHandle {
    /// Submit a command through the buffered queue. Applies backpressure
    /// when 50 commands are already waiting.
    pub async fn push(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Submit a command through the synchronous-handoff priority queue,
    /// bypassing whatever is buffered.
    pub async fn push_priority(&self, command: Command) -> Result<()> {
        self.priority_tx
            .send(command)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Drop this handle, closing the loop once no clones remain
    pub fn close(self) {}
}

enum SessionEvent {
    Expired,
    Incoming(Option<Command>),
}

/// Authorisation level of the live session. Within one session the level
/// only ever moves right: `Transport` -> `Vcsec` -> `VcsecInfotainment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionAuth {
    /// Dialed, no authenticated handshake yet (key-request connections)
    Transport,
    /// VCSEC handshake done; wake and security operations available
    Vcsec,
    /// Full handshake; the whole command surface is available
    VcsecInfotainment,
}

/// The scheduling loop that owns the BLE session
pub struct BleControl {
    connector: Arc<dyn VehicleConnector>,
    private_key: Option<PrivateKeyPem>,
    public_key_pem: Option<Vec<u8>>,
    scan_timeout: Option<Duration>,

    command_rx: mpsc::Receiver<Command>,
    priority_rx: mpsc::Receiver<Command>,

    /// Beacon bound to the live session, for `connection_status`
    operated_beacon: Option<Beacon>,
    /// Authorisation level of the live session
    session_auth: SessionAuth,
    /// Per-VIN timestamp of the last confirmed awake state
    last_awake: HashMap<String, Instant>,
}

impl BleControl {
    /// Create an orchestrator and its submission handle.
    ///
    /// `private_key` of `None` yields a key-request-only orchestrator that
    /// can serve nothing but `add-key-request` flows.
    pub fn new(
        connector: Arc<dyn VehicleConnector>,
        private_key: Option<PrivateKeyPem>,
        public_key_pem: Option<Vec<u8>>,
        scan_timeout: Option<Duration>,
    ) -> (Self, BleHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (priority_tx, priority_rx) = mpsc::channel(1);

        let control = Self {
            connector,
            private_key,
            public_key_pem,
            scan_timeout,
            command_rx,
            priority_rx,
            operated_beacon: None,
            session_auth: SessionAuth::Transport,
            last_awake: HashMap::new(),
        };
        let handle = BleHandle {
            command_tx,
            priority_tx,
        };
        (control, handle)
    }

    /// Load the active key from the keystore, spawn the loop and return the
    /// submission handle.
    ///
    /// Fails when no usable private key is on disk; callers treat that as
    /// "BleControl not initialized" and keep serving HTTP.
    pub fn setup(
        connector: Arc<dyn VehicleConnector>,
        keystore: &KeyStore,
        scan_timeout: Option<Duration>,
    ) -> Result<(BleHandle, JoinHandle<()>)> {
        let private_key = keystore.load_private_key()?;
        debug!("private key loaded");
        let public_key_pem = keystore.load_public_key_pem().ok();

        let (control, handle) = Self::new(connector, Some(private_key), public_key_pem, scan_timeout);
        let task = tokio::spawn(control.run());
        info!("BleControl initialized");
        Ok((handle, task))
    }

    /// Run the scheduling loop until every handle is dropped
    pub async fn run(mut self) {
        let mut retry_command: Option<Command> = None;
        loop {
            sleep(PACING_DELAY).await;

            let command = match retry_command.take() {
                Some(command) => {
                    debug!(command = %command.name, "retrying command from loop");
                    Some(command)
                }
                None => {
                    debug!("waiting for command");
                    tokio::select! {
                        biased;
                        command = self.priority_rx.recv() => command,
                        command = self.command_rx.recv() => command,
                    }
                }
            };

            let Some(command) = command else {
                debug!("command queues closed, stopping loop");
                break;
            };
            if command.is_caller_gone() {
                debug!(command = %command.name, "caller gone, dropping command");
                continue;
            }
            retry_command = self.connect_and_operate(command).await;
        }
    }

    /// Open a session for `first` and run it. Returns a command that must be
    /// resumed on a fresh session, if any.
    async fn connect_and_operate(&mut self, first: Command) -> Option<Command> {
        if first.name == CMD_CONNECTION_STATUS {
            self.answer_connection_status(first, false).await;
            return None;
        }

        info!(vin = %first.vin, "connecting to vehicle");
        let mut first = first;
        let mut backoff = RETRY_BACKOFF_BASE;
        let mut last_err: Option<BridgeError> = None;

        for attempt in 1..=CONNECT_RETRY_COUNT {
            if attempt > 1 {
                if let Some(err) = &last_err {
                    warn!(%err, "connection attempt failed");
                }
                info!("retrying in {}s", backoff.as_secs());
                if !backoff_or_cancel(&mut first, backoff).await {
                    debug!("caller gone, dropping command");
                    return None;
                }
                backoff *= 2;
            }

            debug!(attempt, "trying to connect to vehicle");
            let attempt_result = timeout(CONNECT_ATTEMPT_TIMEOUT, self.try_connect(&first)).await;
            match attempt_result {
                Ok(Ok(mut car)) => {
                    let retry = self.operate(car.as_mut(), first).await;
                    car.disconnect().await;
                    debug!("vehicle connection closed");
                    self.operated_beacon = None;
                    self.session_auth = SessionAuth::Transport;
                    return retry;
                }
                Ok(Err(err)) => {
                    if !err.is_retryable() || first.is_caller_gone() {
                        error!(%err, "can't connect to vehicle");
                        first.complete(CommandOutcome::err(err.to_string()));
                        return None;
                    }
                    last_err = Some(err);
                }
                Err(_) => {
                    last_err = Some(BridgeError::Timeout {
                        seconds: CONNECT_ATTEMPT_TIMEOUT.as_secs(),
                    });
                }
            }
        }

        let err = last_err.unwrap_or(BridgeError::Timeout {
            seconds: CONNECT_ATTEMPT_TIMEOUT.as_secs(),
        });
        error!(%err, "stop retrying after {CONNECT_RETRY_COUNT} attempts");
        first.complete(CommandOutcome::err(err.to_string()));
        None
    }

    /// One connection attempt: scan, dial, transport connect, handshake and
    /// wake as the first command requires.
    async fn try_connect(&mut self, first: &Command) -> Result<Box<dyn VehicleHandle>> {
        debug!("scanning for vehicle");
        // The vehicle beacons every ~200 ms; a short scan window is enough
        // when it is in range.
        let beacon = self.connector.scan(&first.vin, self.scan_timeout).await?;
        debug!(
            local_name = %beacon.local_name,
            address = %beacon.address,
            rssi = beacon.rssi,
            "beacon found"
        );

        debug!("dialing vehicle");
        let mut car = self
            .connector
            .dial(&first.vin, &beacon, self.private_key.as_ref())
            .await?;
        self.session_auth = SessionAuth::Transport;

        car.connect().await?;

        if self.private_key.is_some() {
            debug!("starting VCSEC session");
            car.start_session(&[Domain::Vcsec]).await?;
            self.session_auth = SessionAuth::Vcsec;

            if first.domain() != Domain::Vcsec {
                self.ensure_awake(car.as_mut(), first).await?;
                self.start_infotainment_session(car.as_mut()).await?;
            }
        } else {
            info!("key-request connection established");
        }

        self.operated_beacon = Some(beacon);
        Ok(car)
    }

    /// Decide whether the vehicle must be woken before Infotainment work.
    ///
    /// `vehicle_data` polls are frequent and a wake attempt disturbs the
    /// vehicle, so reads check the sleep state first and trust a confirmed
    /// awake state for nine minutes. Every other command wakes
    /// unconditionally.
    async fn ensure_awake(&mut self, car: &mut dyn VehicleHandle, first: &Command) -> Result<()> {
        if first.name == CMD_VEHICLE_DATA {
            if self.recently_awake(&first.vin) {
                debug!("vehicle was awake recently, skipping sleep check");
                return Ok(());
            }

            let state = car.body_controller_state().await?;
            debug!(sleep_status = %state.sleep_status, "body controller state");
            match state.sleep_status {
                SleepStatus::Awake => {
                    self.record_awake(&first.vin);
                    Ok(())
                }
                SleepStatus::Asleep if first.auto_wakeup => {
                    car.wakeup()
                        .await
                        .map_err(|err| BridgeError::WakeupFailed(err.to_string()))?;
                    self.record_awake(&first.vin);
                    Ok(())
                }
                SleepStatus::Asleep => Err(BridgeError::VehicleAsleep),
                SleepStatus::Unknown if first.auto_wakeup => {
                    // Best effort: an unknown state usually still wakes.
                    if car.wakeup().await.is_ok() {
                        self.record_awake(&first.vin);
                    }
                    Ok(())
                }
                SleepStatus::Unknown => Err(BridgeError::VehicleAsleep),
            }
        } else {
            car.wakeup()
                .await
                .map_err(|err| BridgeError::WakeupFailed(err.to_string()))?;
            debug!("car successfully woken");
            self.record_awake(&first.vin);
            Ok(())
        }
    }

    /// Upgrade the session to VCSEC+Infotainment.
    ///
    /// The handshake can hang on a slow car rather than fail, so every
    /// attempt gets a one-second inner deadline and the call retries until
    /// the surrounding deadline cancels it.
    async fn start_infotainment_session(&mut self, car: &mut dyn VehicleHandle) -> Result<()> {
        debug!("starting Infotainment session");
        loop {
            let started = Instant::now();
            match timeout(
                INFOTAINMENT_HANDSHAKE_TIMEOUT,
                car.start_session(&[Domain::Vcsec, Domain::Infotainment]),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!(duration = ?started.elapsed(), "handshake with vehicle successful");
                    info!("connection established");
                    self.session_auth = SessionAuth::VcsecInfotainment;
                    return Ok(());
                }
                Ok(Err(err)) => {
                    return Err(BridgeError::HandshakeFailed(err.to_string()));
                }
                Err(_) => {
                    debug!("retrying handshake with vehicle");
                }
            }
        }
    }

    /// Run the in-session command pump until the session expires or a
    /// command for another VIN arrives.
    async fn operate(&mut self, car: &mut dyn VehicleHandle, first: Command) -> Option<Command> {
        debug!("operating connection");
        let session_deadline = Instant::now() + SESSION_LIFETIME;
        let first_vin = first.vin.clone();

        if let Some(retry) = self
            .handle_in_session(car, first, &first_vin, session_deadline)
            .await
        {
            return Some(retry);
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = sleep_until(session_deadline) => SessionEvent::Expired,
                command = self.priority_rx.recv() => SessionEvent::Incoming(command),
                command = self.command_rx.recv() => SessionEvent::Incoming(command),
            };

            match event {
                SessionEvent::Expired => {
                    debug!("connection timeout");
                    return None;
                }
                SessionEvent::Incoming(None) => return None,
                SessionEvent::Incoming(Some(command)) => {
                    if command.is_caller_gone() {
                        debug!(command = %command.name, "caller gone, dropping command");
                        continue;
                    }
                    if let Some(retry) = self
                        .handle_in_session(car, command, &first_vin, session_deadline)
                        .await
                    {
                        return Some(retry);
                    }
                }
            }
        }
    }

    async fn handle_in_session(
        &mut self,
        car: &mut dyn VehicleHandle,
        command: Command,
        first_vin: &str,
        session_deadline: Instant,
    ) -> Option<Command> {
        if command.name == CMD_CONNECTION_STATUS {
            let operated = command.vin == first_vin;
            self.answer_connection_status(command, operated).await;
            return None;
        }

        // A command for another vehicle ends this session; the outer loop
        // starts a new one with it.
        if command.vin != first_vin {
            debug!(vin = %command.vin, "new VIN, closing connection");
            return Some(command);
        }

        self.execute_command(car, command, session_deadline).await
    }

    /// Execute one command with retries. Fires the completion signal on
    /// every path except when the command is handed back for resumption on a
    /// fresh session (lost connection / expired session).
    async fn execute_command(
        &mut self,
        car: &mut dyn VehicleHandle,
        mut command: Command,
        session_deadline: Instant,
    ) -> Option<Command> {
        debug!(command = %command.name, body = ?command.body, "sending command");

        // Waiting callers bound execution by walking away; fire-and-forget
        // commands get a fixed deadline instead. Both compose with the
        // session lifetime.
        let deadline = if command.completion.is_some() {
            session_deadline
        } else {
            session_deadline.min(Instant::now() + COMMAND_TIMEOUT)
        };

        let env = SendEnv {
            public_key_pem: self.public_key_pem.clone(),
        };
        let mut backoff = RETRY_BACKOFF_BASE;
        let mut last_err: Option<BridgeError> = None;
        let mut wait_before_attempt = false;

        while command.total_retries < COMMAND_RETRY_COUNT {
            if wait_before_attempt {
                if let Some(err) = &last_err {
                    warn!(%err, "command attempt failed");
                }
                info!("retrying in {}s", backoff.as_secs());
                match interruptible_backoff(&mut command, backoff, session_deadline).await {
                    BackoffOutcome::Ready => backoff *= 2,
                    BackoffOutcome::SessionExpired => {
                        debug!("operated connection expired");
                        return Some(command);
                    }
                    BackoffOutcome::CallerGone => {
                        debug!("caller gone, dropping command");
                        return None;
                    }
                }
            }
            wait_before_attempt = true;
            command.total_retries += 1;

            // Upgrade a VCSEC-only session before Infotainment commands.
            if self.session_auth != SessionAuth::VcsecInfotainment
                && command.domain() == Domain::Infotainment
                && self.private_key.is_some()
            {
                if let Err(err) = car.wakeup().await {
                    last_err = Some(BridgeError::WakeupFailed(err.to_string()));
                    continue;
                }
                self.record_awake(&command.vin);
                match timeout_at(session_deadline, self.start_infotainment_session(car)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        last_err = Some(err);
                        continue;
                    }
                    Err(_) => {
                        debug!("operated connection expired during handshake");
                        return Some(command);
                    }
                }
            }

            let send_attempt = timeout_at(deadline, command.send(car, &env)).await;
            let send_result = match send_attempt {
                Ok(result) => result,
                Err(_) => {
                    if Instant::now() >= session_deadline {
                        debug!("operated connection expired");
                        return Some(command);
                    }
                    let err = BridgeError::Timeout {
                        seconds: COMMAND_TIMEOUT.as_secs(),
                    };
                    warn!(command = %command.name, %err, "giving up on command");
                    command.complete(CommandOutcome::err(err.to_string()));
                    return None;
                }
            };

            match send_result {
                Ok(response) => {
                    info!(command = %command.name, "successfully executed");
                    command.complete(CommandOutcome::ok(response));
                    return None;
                }
                Err(err) if err.is_connection_lost() => {
                    // The session is dead; hand the command back so the
                    // outer loop re-opens one and resumes it.
                    warn!(%err, "connection lost mid-command");
                    return Some(command);
                }
                Err(err) if !err.is_retryable() => {
                    command.complete(CommandOutcome::err(err.to_string()));
                    return None;
                }
                Err(err) => last_err = Some(err),
            }
        }

        let reason = last_err
            .map(|err| err.to_string())
            .unwrap_or_else(|| "max retries reached".to_string());
        warn!(command = %command.name, %reason, "max retries reached");
        command.complete(CommandOutcome::err(reason));
        None
    }

    /// Answer `connection_status` without opening (or waking) anything.
    ///
    /// For the VIN of the live session the operated beacon is returned;
    /// otherwise a short scan checks reachability. A vehicle that is not
    /// connectable is an answer, not an error.
    async fn answer_connection_status(&mut self, command: Command, operated: bool) {
        let beacon = if operated {
            if self.operated_beacon.is_none() {
                warn!("operated beacon missing for live session");
            }
            self.operated_beacon.clone()
        } else {
            match self.connector.scan(&command.vin, self.scan_timeout).await {
                Ok(beacon) => Some(beacon),
                Err(BridgeError::ScanTimeout { .. }) => None,
                Err(err) => {
                    command.complete(CommandOutcome::err(err.to_string()));
                    return;
                }
            }
        };

        let response = match beacon {
            Some(beacon) => json!({
                "local_name": beacon.local_name,
                "connectable": true,
                "address": beacon.address,
                "rssi": beacon.rssi,
                "operated": operated,
            }),
            None => json!({
                "local_name": self.connector.local_name(&command.vin),
                "connectable": false,
                "address": null,
                "rssi": null,
                "operated": false,
            }),
        };
        command.complete(CommandOutcome::ok(Some(response)));
    }

    fn recently_awake(&self, vin: &str) -> bool {
        self.last_awake
            .get(vin)
            .is_some_and(|at| at.elapsed() < AWAKE_GRACE)
    }

    fn record_awake(&mut self, vin: &str) {
        self.last_awake.insert(vin.to_string(), Instant::now());
    }
}

enum BackoffOutcome {
    Ready,
    SessionExpired,
    CallerGone,
}

/// Sleep for `backoff`, aborting early when the session expires or the
/// caller walks away.
async fn interruptible_backoff(
    command: &mut Command,
    backoff: Duration,
    session_deadline: Instant,
) -> BackoffOutcome {
    match command.completion.as_mut() {
        Some(completion) => {
            tokio::select! {
                biased;
                _ = completion.caller_gone() => BackoffOutcome::CallerGone,
                _ = sleep_until(session_deadline) => BackoffOutcome::SessionExpired,
                _ = sleep(backoff) => BackoffOutcome::Ready,
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = sleep_until(session_deadline) => BackoffOutcome::SessionExpired,
                _ = sleep(backoff) => BackoffOutcome::Ready,
            }
        }
    }
}

/// Sleep for `backoff` unless the caller walks away first. Returns `false`
/// when the command should be dropped.
async fn backoff_or_cancel(command: &mut Command, backoff: Duration) -> bool {
    match command.completion.as_mut() {
        Some(completion) => {
            tokio::select! {
                biased;
                _ = completion.caller_gone() => false,
                _ = sleep(backoff) => true,
            }
        }
        None => {
            sleep(backoff).await;
            true
        }
    }
}
