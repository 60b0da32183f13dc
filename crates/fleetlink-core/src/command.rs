//! The command model
//!
//! Everything an HTTP request turns into before it reaches the orchestrator:
//! a [`Command`] value plus, for callers that wait, a [`Completion`] slot the
//! orchestrator fills exactly once.

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::vehicle::Domain;

/// `connection_status`: answered by the orchestrator without a session
pub const CMD_CONNECTION_STATUS: &str = "connection_status";
/// `vehicle_data`: multi-endpoint state read
pub const CMD_VEHICLE_DATA: &str = "vehicle_data";
/// `wake_up`: first-class wake request
pub const CMD_WAKE_UP: &str = "wake_up";
/// `session_info`: session introspection for the active public key
pub const CMD_SESSION_INFO: &str = "session_info";
/// `add-key-request`: key enrollment over an unauthenticated session
pub const CMD_ADD_KEY_REQUEST: &str = "add-key-request";
/// `body_controller_state`: VCSEC read that works on a sleeping vehicle
pub const CMD_BODY_CONTROLLER_STATE: &str = "body_controller_state";

/// Where a command entered the system; selects the executor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// `POST /api/1/vehicles/{vin}/command/{name}`
    FleetCommand,
    /// `GET /api/1/vehicles/{vin}/vehicle_data`, `POST .../wake_up`
    FleetEndpoint,
    /// `GET /api/proxy/1/vehicles/{vin}/{name}`: proxy-local introspection
    ProxyIntrinsic,
}

/// Terminal result of one command, written into the caller's completion slot.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Whether the command succeeded
    pub result: bool,
    /// Failure reason; empty on success
    pub reason: String,
    /// Response payload, when the command produces one
    pub response: Option<Value>,
}

impl CommandOutcome {
    /// Successful outcome with an optional payload
    pub fn ok(response: Option<Value>) -> Self {
        Self {
            result: true,
            reason: String::new(),
            response,
        }
    }

    /// Failed outcome
    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            result: false,
            reason: reason.into(),
            response: None,
        }
    }
}

/// Caller-held wait handle paired with a queued command.
///
/// Sending consumes the slot, so the exactly-one-completion invariant holds
/// by construction. The caller abandoning the request (dropping the receiver)
/// is the cancellation signal: the orchestrator observes it through
/// [`Completion::is_caller_gone`] / [`Completion::caller_gone`].
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<CommandOutcome>,
}

impl Completion {
    /// Create a completion slot and the receiver the caller awaits
    pub fn channel() -> (Self, oneshot::Receiver<CommandOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Fill the slot. A vanished caller makes this a no-op.
    pub fn finish(self, outcome: CommandOutcome) {
        let _ = self.tx.send(outcome);
    }

    /// Whether the caller already walked away
    pub fn is_caller_gone(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the caller walks away
    pub async fn caller_gone(&mut self) {
        self.tx.closed().await;
    }
}

/// One request to the orchestrator. Immutable after submission except for
/// the retry counter.
#[derive(Debug)]
pub struct Command {
    /// Operation identifier (e.g. `charge_start`, `vehicle_data`)
    pub name: String,
    /// Source class, disambiguating overloaded names
    pub source: CommandSource,
    /// 17-character vehicle identifier
    pub vin: String,
    /// Request body as decoded JSON; validated before enqueueing
    pub body: Map<String, Value>,
    /// Whether `vehicle_data` may wake a sleeping vehicle
    pub auto_wakeup: bool,
    /// Attempts consumed so far, across session re-opens; capped at 3
    pub total_retries: u32,
    /// Result slot for waiting callers; `None` for fire-and-forget
    pub completion: Option<Completion>,
}

impl Command {
    /// Build a fire-and-forget command with an empty body
    pub fn new(name: impl Into<String>, source: CommandSource, vin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            vin: vin.into(),
            body: Map::new(),
            auto_wakeup: false,
            total_retries: 0,
            completion: None,
        }
    }

    /// Attach a request body
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    /// Set the auto-wakeup hint
    pub fn with_auto_wakeup(mut self, auto_wakeup: bool) -> Self {
        self.auto_wakeup = auto_wakeup;
        self
    }

    /// Attach a completion slot
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// The session domain this command needs before it can execute.
    ///
    /// The three VCSEC operations run without waking the vehicle; everything
    /// else needs a wake plus an Infotainment handshake.
    pub fn domain(&self) -> Domain {
        match self.name.as_str() {
            CMD_SESSION_INFO | CMD_ADD_KEY_REQUEST | CMD_BODY_CONTROLLER_STATE => Domain::Vcsec,
            _ => Domain::Infotainment,
        }
    }

    /// Whether the submitting caller already abandoned this command
    pub fn is_caller_gone(&self) -> bool {
        self.completion
            .as_ref()
            .is_some_and(Completion::is_caller_gone)
    }

    /// Complete with an outcome; a no-op for fire-and-forget commands
    pub fn complete(self, outcome: CommandOutcome) {
        if let Some(completion) = self.completion {
            completion.finish(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_derivation() {
        for name in [CMD_SESSION_INFO, CMD_ADD_KEY_REQUEST, CMD_BODY_CONTROLLER_STATE] {
            let cmd = Command::new(name, CommandSource::ProxyIntrinsic, "5YJ3E1EA1JF000001");
            assert_eq!(cmd.domain(), Domain::Vcsec);
        }
        for name in ["charge_start", CMD_VEHICLE_DATA, CMD_WAKE_UP, "flash_lights"] {
            let cmd = Command::new(name, CommandSource::FleetCommand, "5YJ3E1EA1JF000001");
            assert_eq!(cmd.domain(), Domain::Infotainment);
        }
    }

    #[tokio::test]
    async fn test_completion_delivers_once() {
        let (completion, rx) = Completion::channel();
        let cmd = Command::new("flash_lights", CommandSource::FleetCommand, "VIN")
            .with_completion(completion);
        cmd.complete(CommandOutcome::ok(None));
        let outcome = rx.await.unwrap();
        assert!(outcome.result);
        assert!(outcome.reason.is_empty());
    }

    #[tokio::test]
    async fn test_caller_gone_detected_after_receiver_drop() {
        let (completion, rx) = Completion::channel();
        let cmd = Command::new("flash_lights", CommandSource::FleetCommand, "VIN")
            .with_completion(completion);
        assert!(!cmd.is_caller_gone());
        drop(rx);
        assert!(cmd.is_caller_gone());
        // Completing after the caller left must not panic.
        cmd.complete(CommandOutcome::err("too late"));
    }

    #[test]
    fn test_fire_and_forget_never_reports_caller_gone() {
        let cmd = Command::new("flash_lights", CommandSource::FleetCommand, "VIN");
        assert!(!cmd.is_caller_gone());
    }
}
