//! Command dispatch onto a live vehicle handle
//!
//! [`Command::send`] is a pure mapping from a validated command onto the
//! handle's verbs. Retry policy, deadlines and completion signalling stay in
//! the orchestrator; the only policy applied here is the per-command
//! `check_error` remap.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::command::{
    Command, CMD_ADD_KEY_REQUEST, CMD_BODY_CONTROLLER_STATE, CMD_SESSION_INFO, CMD_VEHICLE_DATA,
    CMD_WAKE_UP,
};
use crate::error::{BridgeError, Result};
use crate::fleet;
use crate::vehicle::{StateCategory, VehicleAction, VehicleHandle};

/// Ambient material a command may need while executing
#[derive(Debug, Default)]
pub struct SendEnv {
    /// PEM bytes of the active role's public key, when one is on disk
    pub public_key_pem: Option<Vec<u8>>,
}

impl SendEnv {
    fn public_key(&self) -> Result<&[u8]> {
        self.public_key_pem
            .as_deref()
            .ok_or_else(|| BridgeError::InvalidKey("failed to load public key".to_string()))
    }
}

impl Command {
    /// Execute this command against a live handle, returning the response
    /// payload when the operation produces one.
    pub async fn send(&self, car: &mut dyn VehicleHandle, env: &SendEnv) -> Result<Option<Value>> {
        match self.name.as_str() {
            CMD_WAKE_UP => {
                car.wakeup().await?;
                Ok(None)
            }
            CMD_VEHICLE_DATA => self.send_vehicle_data(car).await,
            CMD_BODY_CONTROLLER_STATE => {
                let state = car.body_controller_state().await?;
                Ok(Some(state.to_json()))
            }
            CMD_SESSION_INFO => {
                let info = car.session_info(env.public_key()?).await?;
                Ok(Some(info))
            }
            CMD_ADD_KEY_REQUEST => {
                let role = self
                    .body
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("owner");
                car.add_key_request(env.public_key()?, role).await?;
                info!(
                    vin = %car.vin(),
                    "sent add-key request; confirm by tapping an NFC card on the center console"
                );
                Ok(None)
            }
            name => {
                let action = fleet::build_action(name, &self.body)?;
                let result = match &action {
                    VehicleAction::Wakeup => car.wakeup().await,
                    other => car.execute(other).await,
                };
                match result {
                    Ok(()) => Ok(None),
                    Err(err) if fleet::remaps_to_success(name, &err) => {
                        info!(command = %name, "vehicle already in the requested state");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn send_vehicle_data(&self, car: &mut dyn VehicleHandle) -> Result<Option<Value>> {
        let endpoints: Vec<&str> = match self.body.get("endpoints") {
            Some(Value::Array(items)) if !items.is_empty() => {
                items.iter().filter_map(Value::as_str).collect()
            }
            _ => {
                return Err(BridgeError::Validation(
                    "missing or invalid 'endpoints' in request body".to_string(),
                ))
            }
        };

        let mut response = Map::new();
        for endpoint in endpoints {
            debug!(%endpoint, "reading vehicle state");
            let category = StateCategory::from_endpoint(endpoint)?;
            let data = car.vehicle_state(category).await?;
            response.insert(category.endpoint().to_string(), data);
        }
        Ok(Some(Value::Object(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSource;
    use crate::vehicle::{BodyControllerState, Domain, SleepStatus};
    use async_trait::async_trait;
    use serde_json::json;

    /// Minimal handle recording what was dispatched
    struct RecordingHandle {
        vin: String,
        actions: Vec<VehicleAction>,
        wakeups: usize,
        states: Vec<StateCategory>,
        fail_with: Option<BridgeError>,
    }

    impl RecordingHandle {
        fn new() -> Self {
            Self {
                vin: "5YJ3E1EA1JF000001".to_string(),
                actions: Vec::new(),
                wakeups: 0,
                states: Vec::new(),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl VehicleHandle for RecordingHandle {
        fn vin(&self) -> &str {
            &self.vin
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn start_session(&mut self, _domains: &[Domain]) -> Result<()> {
            Ok(())
        }

        async fn wakeup(&mut self) -> Result<()> {
            self.wakeups += 1;
            Ok(())
        }

        async fn execute(&mut self, action: &VehicleAction) -> Result<()> {
            if let Some(err) = self.fail_with.take() {
                return Err(err);
            }
            self.actions.push(action.clone());
            Ok(())
        }

        async fn vehicle_state(&mut self, category: StateCategory) -> Result<Value> {
            self.states.push(category);
            Ok(json!({"endpoint": category.endpoint()}))
        }

        async fn body_controller_state(&mut self) -> Result<BodyControllerState> {
            Ok(BodyControllerState {
                sleep_status: SleepStatus::Awake,
                detail: Map::new(),
            })
        }

        async fn session_info(&mut self, _public_key_pem: &[u8]) -> Result<Value> {
            Ok(json!({"counter": 42}))
        }

        async fn add_key_request(&mut self, _public_key_pem: &[u8], _role: &str) -> Result<()> {
            Ok(())
        }
    }

    fn command(name: &str, body: Value) -> Command {
        Command::new(name, CommandSource::FleetCommand, "5YJ3E1EA1JF000001")
            .with_body(body.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn test_fleet_command_dispatches_action() {
        let mut car = RecordingHandle::new();
        let cmd = command("set_charge_limit", json!({"percent": 80}));
        let out = cmd.send(&mut car, &SendEnv::default()).await.unwrap();
        assert!(out.is_none());
        assert_eq!(car.actions, vec![VehicleAction::ChangeChargeLimit(80)]);
    }

    #[tokio::test]
    async fn test_wake_up_uses_wakeup_verb() {
        let mut car = RecordingHandle::new();
        let cmd = command(CMD_WAKE_UP, json!({}));
        cmd.send(&mut car, &SendEnv::default()).await.unwrap();
        assert_eq!(car.wakeups, 1);
        assert!(car.actions.is_empty());
    }

    #[tokio::test]
    async fn test_vehicle_data_reads_each_endpoint() {
        let mut car = RecordingHandle::new();
        let cmd = command(
            CMD_VEHICLE_DATA,
            json!({"endpoints": ["charge_state", "climate_state"]}),
        );
        let out = cmd.send(&mut car, &SendEnv::default()).await.unwrap().unwrap();
        assert_eq!(
            car.states,
            vec![StateCategory::Charge, StateCategory::Climate]
        );
        assert!(out.get("charge_state").is_some());
        assert!(out.get("climate_state").is_some());
    }

    #[tokio::test]
    async fn test_vehicle_data_unsupported_endpoint() {
        let mut car = RecordingHandle::new();
        let cmd = command(CMD_VEHICLE_DATA, json!({"endpoints": ["gui_settings"]}));
        let err = cmd.send(&mut car, &SendEnv::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedEndpoint(_)));
    }

    #[tokio::test]
    async fn test_charge_start_rejection_remaps_to_success() {
        let mut car = RecordingHandle::new();
        car.fail_with = Some(BridgeError::VehicleRejected(
            "car could not execute command: is_charging".to_string(),
        ));
        let cmd = command("charge_start", json!({}));
        let out = cmd.send(&mut car, &SendEnv::default()).await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn test_session_info_requires_public_key() {
        let mut car = RecordingHandle::new();
        let cmd = command(CMD_SESSION_INFO, json!({}));
        assert!(cmd.send(&mut car, &SendEnv::default()).await.is_err());

        let env = SendEnv {
            public_key_pem: Some(b"-----BEGIN PUBLIC KEY-----".to_vec()),
        };
        let out = cmd.send(&mut car, &env).await.unwrap().unwrap();
        assert_eq!(out["counter"], 42);
    }

    #[tokio::test]
    async fn test_body_controller_state_includes_sleep_status() {
        let mut car = RecordingHandle::new();
        let cmd = command(CMD_BODY_CONTROLLER_STATE, json!({}));
        let out = cmd.send(&mut car, &SendEnv::default()).await.unwrap().unwrap();
        assert_eq!(out["vehicle_sleep_status"], "awake");
    }
}
