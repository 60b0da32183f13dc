//! Scriptable mock connector and vehicle
//!
//! The BLE driver is external, so the whole orchestrator test suite runs
//! against this mock. It records every interaction as a [`MockEvent`], can
//! be scripted to fail specific verbs, and rejects concurrent dials so tests
//! can assert the single-active-session invariant.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use fleetlink_core::error::{BridgeError, Result};
use fleetlink_core::vehicle::{
    Beacon, BodyControllerState, Domain, PrivateKeyPem, SleepStatus, StateCategory, VehicleAction,
    VehicleConnector, VehicleHandle,
};

/// One recorded interaction with the mock driver
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Scan for a VIN
    Scan(String),
    /// Dial the beacon of a VIN
    Dial(String),
    /// Transport connect
    Connect,
    /// Session handshake for the given domains
    StartSession(Vec<Domain>),
    /// Wake request
    Wakeup,
    /// Dispatched command verb
    Execute(VehicleAction),
    /// State read
    VehicleState(StateCategory),
    /// Body-controller read
    BodyControllerState,
    /// Session-info read
    SessionInfo,
    /// Key enrollment request for a role
    AddKeyRequest(String),
    /// Connection teardown
    Disconnect,
}

struct MockState {
    in_range: bool,
    sleep_status: SleepStatus,
    rssi: i16,
    scan_errors: VecDeque<BridgeError>,
    handshake_errors: VecDeque<BridgeError>,
    wakeup_errors: VecDeque<BridgeError>,
    execute_errors: VecDeque<BridgeError>,
    state_payloads: Vec<(StateCategory, Value)>,
    active_dials: usize,
    max_active_dials: usize,
    events: Vec<MockEvent>,
}

impl MockState {
    fn new() -> Self {
        Self {
            in_range: true,
            sleep_status: SleepStatus::Awake,
            rssi: -70,
            scan_errors: VecDeque::new(),
            handshake_errors: VecDeque::new(),
            wakeup_errors: VecDeque::new(),
            execute_errors: VecDeque::new(),
            state_payloads: Vec::new(),
            active_dials: 0,
            max_active_dials: 0,
            events: Vec::new(),
        }
    }
}

/// Mock [`VehicleConnector`] backing the orchestrator tests
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// A connector with a reachable, awake vehicle for any VIN
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
        }
    }

    /// Whether scans find the vehicle at all
    pub fn set_in_range(&self, in_range: bool) {
        self.state.lock().in_range = in_range;
    }

    /// Sleep state the body controller reports
    pub fn set_sleep_status(&self, status: SleepStatus) {
        self.state.lock().sleep_status = status;
    }

    /// Fail the next scan with `err`
    pub fn fail_next_scan(&self, err: BridgeError) {
        self.state.lock().scan_errors.push_back(err);
    }

    /// Fail the next session handshake with `err`
    pub fn fail_next_handshake(&self, err: BridgeError) {
        self.state.lock().handshake_errors.push_back(err);
    }

    /// Fail the next wake request with `err`
    pub fn fail_next_wakeup(&self, err: BridgeError) {
        self.state.lock().wakeup_errors.push_back(err);
    }

    /// Fail the next dispatched verb with `err`
    pub fn fail_next_execute(&self, err: BridgeError) {
        self.state.lock().execute_errors.push_back(err);
    }

    /// Payload returned for a state category (default is a small stub)
    pub fn set_state_payload(&self, category: StateCategory, payload: Value) {
        self.state.lock().state_payloads.push((category, payload));
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| predicate(e)).count()
    }

    /// Highest number of simultaneously open connections observed
    pub fn max_active_dials(&self) -> usize {
        self.state.lock().max_active_dials
    }

    /// Poll until the recorded events satisfy `predicate` or `timeout`
    /// elapses. Returns whether the predicate held.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&[MockEvent]) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.state.lock().events) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl VehicleConnector for MockConnector {
    async fn scan(&self, vin: &str, timeout: Option<Duration>) -> Result<Beacon> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Scan(vin.to_string()));
        if let Some(err) = state.scan_errors.pop_front() {
            return Err(err);
        }
        if !state.in_range {
            return Err(BridgeError::ScanTimeout {
                seconds: timeout.map(|t| t.as_secs()).unwrap_or(0),
            });
        }
        Ok(Beacon {
            local_name: self.local_name(vin),
            address: "C0:FF:EE:00:00:01".to_string(),
            rssi: state.rssi,
        })
    }

    async fn dial(
        &self,
        vin: &str,
        _beacon: &Beacon,
        _key: Option<&PrivateKeyPem>,
    ) -> Result<Box<dyn VehicleHandle>> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Dial(vin.to_string()));
        if state.active_dials > 0 {
            return Err(BridgeError::DialFailed(
                "concurrent dial rejected".to_string(),
            ));
        }
        state.active_dials += 1;
        state.max_active_dials = state.max_active_dials.max(state.active_dials);
        drop(state);

        Ok(Box::new(MockVehicle {
            vin: vin.to_string(),
            state: Arc::clone(&self.state),
            open: true,
        }))
    }

    fn local_name(&self, vin: &str) -> String {
        format!("S{vin}C")
    }
}

/// Mock [`VehicleHandle`] produced by [`MockConnector::dial`]
pub struct MockVehicle {
    vin: String,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockVehicle {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().active_dials -= 1;
        }
    }
}

impl Drop for MockVehicle {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl VehicleHandle for MockVehicle {
    fn vin(&self) -> &str {
        &self.vin
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.lock().events.push(MockEvent::Connect);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.lock().events.push(MockEvent::Disconnect);
        self.release();
    }

    async fn start_session(&mut self, domains: &[Domain]) -> Result<()> {
        let mut state = self.state.lock();
        state
            .events
            .push(MockEvent::StartSession(domains.to_vec()));
        if let Some(err) = state.handshake_errors.pop_front() {
            return Err(err);
        }
        Ok(())
    }

    async fn wakeup(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Wakeup);
        if let Some(err) = state.wakeup_errors.pop_front() {
            return Err(err);
        }
        state.sleep_status = SleepStatus::Awake;
        Ok(())
    }

    async fn execute(&mut self, action: &VehicleAction) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Execute(action.clone()));
        if let Some(err) = state.execute_errors.pop_front() {
            return Err(err);
        }
        Ok(())
    }

    async fn vehicle_state(&mut self, category: StateCategory) -> Result<Value> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::VehicleState(category));
        let payload = state
            .state_payloads
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, payload)| payload.clone())
            .unwrap_or_else(|| json!({"endpoint": category.endpoint(), "source": "ble"}));
        Ok(payload)
    }

    async fn body_controller_state(&mut self) -> Result<BodyControllerState> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::BodyControllerState);
        let mut detail = Map::new();
        detail.insert("vehicle_lock_state".to_string(), json!("locked"));
        Ok(BodyControllerState {
            sleep_status: state.sleep_status,
            detail,
        })
    }

    async fn session_info(&mut self, _public_key_pem: &[u8]) -> Result<Value> {
        self.state.lock().events.push(MockEvent::SessionInfo);
        Ok(json!({"counter": 7, "publicKey": "mock"}))
    }

    async fn add_key_request(&mut self, _public_key_pem: &[u8], role: &str) -> Result<()> {
        self.state
            .lock()
            .events
            .push(MockEvent::AddKeyRequest(role.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rejects_concurrent_dials() {
        let connector = MockConnector::new();
        let beacon = connector.scan("VIN", None).await.unwrap();
        let first = connector.dial("VIN", &beacon, None).await.unwrap();
        let second = connector.dial("VIN", &beacon, None).await;
        assert!(second.is_err());
        drop(first);
        // Released on drop, so a new dial succeeds.
        connector.dial("VIN", &beacon, None).await.unwrap();
        assert_eq!(connector.max_active_dials(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures_are_consumed() {
        let connector = MockConnector::new();
        connector.fail_next_scan(BridgeError::ScanFailed("hci busy".into()));
        assert!(connector.scan("VIN", None).await.is_err());
        assert!(connector.scan("VIN", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_out_of_range() {
        let connector = MockConnector::new();
        connector.set_in_range(false);
        let err = connector
            .scan("VIN", Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ScanTimeout { seconds: 2 }));
    }
}
