//! In-memory Modbus slave
//!
//! Stands in for the serial line when `simulate: true` and in tests. Every
//! transaction is recorded, and failures can be injected per connection
//! stage or at the n-th transaction.

use crate::devices::ConnectStage;
use crate::error::{EvaporatorError, Result};
use crate::modbus::{MAX_SLAVE_ID, ModbusConnector, ModbusLike, SerialSettings};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One register transaction seen on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    WriteRegister(u16, u16),
    WriteBit(u16, bool),
    ReadHolding(u16),
    ReadInput(u16),
}

/// Handle lifecycle events, tagged with the handle number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created(u64),
    Opened(u64),
    Closed(u64),
    Dropped(u64),
}

#[derive(Debug, Default)]
struct BusState {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    transactions: Vec<Op>,
    lifecycle: Vec<Lifecycle>,
    failing_stage: Option<ConnectStage>,
    fail_countdown: Option<usize>,
    responding: bool,
    next_handle: u64,
    live_handles: usize,
    last_settings: Option<SerialSettings>,
    last_slave: Option<u8>,
}

/// Shared register image and bus log
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                responding: true,
                ..BusState::default()
            })),
        }
    }
}

impl SimulatedBus {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_holding(&self, address: u16, value: u16) {
        self.lock().holding.insert(address, value);
    }

    pub fn set_input(&self, address: u16, value: u16) {
        self.lock().input.insert(address, value);
    }

    pub fn holding(&self, address: u16) -> Option<u16> {
        self.lock().holding.get(&address).copied()
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.lock().coils.get(&address).copied()
    }

    /// Register transactions attempted so far, failed ones included
    pub fn transactions(&self) -> Vec<Op> {
        self.lock().transactions.clone()
    }

    pub fn lifecycle(&self) -> Vec<Lifecycle> {
        self.lock().lifecycle.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.transactions.clear();
        state.lifecycle.clear();
    }

    /// Make the given connection stage fail on every following attempt
    pub fn fail_connect_stage(&self, stage: Option<ConnectStage>) {
        self.lock().failing_stage = stage;
    }

    /// Fail the n-th transaction from now (1 = the next one)
    pub fn fail_transaction(&self, nth: usize) {
        self.lock().fail_countdown = Some(nth.max(1));
    }

    /// A slave that does not respond fails every transaction
    pub fn set_responding(&self, responding: bool) {
        self.lock().responding = responding;
    }

    /// Handles created and not yet dropped
    pub fn live_handles(&self) -> usize {
        self.lock().live_handles
    }

    pub fn created_handles(&self) -> u64 {
        self.lock().next_handle
    }

    pub fn last_settings(&self) -> Option<SerialSettings> {
        self.lock().last_settings.clone()
    }

    pub fn last_slave(&self) -> Option<u8> {
        self.lock().last_slave
    }

    fn stage_fails(&self, stage: ConnectStage) -> bool {
        self.lock().failing_stage == Some(stage)
    }

    fn record(&self, event: Lifecycle) {
        self.lock().lifecycle.push(event);
    }

    fn transact(&self, op: Op) -> Result<Option<u16>> {
        let mut state = self.lock();
        state.transactions.push(op);

        let injected = match state.fail_countdown {
            Some(n) if n <= 1 => {
                state.fail_countdown = None;
                true
            }
            Some(n) => {
                state.fail_countdown = Some(n - 1);
                false
            }
            None => false,
        };
        if injected || !state.responding {
            return Err(EvaporatorError::timeout(format!("No response to {:?}", op)));
        }

        Ok(match op {
            Op::WriteRegister(address, value) => {
                state.holding.insert(address, value);
                None
            }
            Op::WriteBit(address, value) => {
                state.coils.insert(address, value);
                None
            }
            Op::ReadHolding(address) => Some(state.holding.get(&address).copied().unwrap_or(0)),
            Op::ReadInput(address) => Some(state.input.get(&address).copied().unwrap_or(0)),
        })
    }
}

/// Connector handing out handles onto one [`SimulatedBus`]
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    bus: SimulatedBus,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self) -> &SimulatedBus {
        &self.bus
    }
}

impl ModbusConnector for SimulatedConnector {
    fn create(&self, settings: &SerialSettings) -> Result<Box<dyn ModbusLike>> {
        settings.validate()?;
        if self.bus.stage_fails(ConnectStage::Create) {
            return Err(EvaporatorError::serial(format!(
                "Cannot create handle for {}",
                settings.port
            )));
        }

        let id = {
            let mut state = self.bus.lock();
            state.next_handle += 1;
            state.live_handles += 1;
            state.last_settings = Some(settings.clone());
            let id = state.next_handle;
            state.lifecycle.push(Lifecycle::Created(id));
            id
        };
        Ok(Box::new(SimulatedClient {
            id,
            bus: self.bus.clone(),
            slave: None,
            open: false,
        }))
    }
}

struct SimulatedClient {
    id: u64,
    bus: SimulatedBus,
    slave: Option<u8>,
    open: bool,
}

impl SimulatedClient {
    fn transact(&self, op: Op) -> Result<Option<u16>> {
        if !self.open {
            return Err(EvaporatorError::modbus("Not connected to Modbus slave"));
        }
        self.bus.transact(op)
    }

    fn read(&self, op: Op) -> Result<u16> {
        self.transact(op)?
            .ok_or_else(|| EvaporatorError::modbus("Empty register response"))
    }
}

#[async_trait]
impl ModbusLike for SimulatedClient {
    fn set_slave(&mut self, slave_id: u8) -> Result<()> {
        if self.bus.stage_fails(ConnectStage::SetSlave) || slave_id == 0 || slave_id > MAX_SLAVE_ID {
            return Err(EvaporatorError::modbus(format!(
                "Cannot address slave {}",
                slave_id
            )));
        }
        self.slave = Some(slave_id);
        self.bus.lock().last_slave = Some(slave_id);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        if self.slave.is_none() || self.bus.stage_fails(ConnectStage::Establish) {
            return Err(EvaporatorError::serial("Cannot open simulated line"));
        }
        self.open = true;
        self.bus.record(Lifecycle::Opened(self.id));
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.bus.record(Lifecycle::Closed(self.id));
        }
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        self.read(Op::ReadHolding(address))
    }

    async fn read_input_register(&mut self, address: u16) -> Result<u16> {
        self.read(Op::ReadInput(address))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.transact(Op::WriteRegister(address, value)).map(|_| ())
    }

    async fn write_bit(&mut self, address: u16, value: bool) -> Result<()> {
        self.transact(Op::WriteBit(address, value)).map(|_| ())
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        let mut state = self.bus.lock();
        state.live_handles = state.live_handles.saturating_sub(1);
        state.lifecycle.push(Lifecycle::Dropped(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::Parity;
    use std::time::Duration;

    fn settings() -> SerialSettings {
        SerialSettings {
            port: "sim".to_string(),
            baud_rate: 19200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            response_timeout: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_register_image() {
        let connector = SimulatedConnector::new();
        let mut client = connector.create(&settings()).unwrap();
        client.set_slave(1).unwrap();
        client.connect().await.unwrap();

        client.write_register(18, 7).await.unwrap();
        client.write_bit(272, true).await.unwrap();
        assert_eq!(client.read_holding_register(18).await.unwrap(), 7);
        assert_eq!(client.read_input_register(20).await.unwrap(), 0);
        assert_eq!(connector.bus().coil(272), Some(true));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let connector = SimulatedConnector::new();
        let mut client = connector.create(&settings()).unwrap();
        client.set_slave(1).unwrap();
        client.connect().await.unwrap();

        connector.bus().fail_transaction(2);
        assert!(client.write_register(1, 1).await.is_ok());
        assert!(client.write_register(2, 2).await.is_err());
        assert!(client.write_register(3, 3).await.is_ok());
        assert_eq!(connector.bus().holding(2), None);

        connector.bus().set_responding(false);
        assert!(client.read_holding_register(1).await.is_err());
    }

    #[test]
    fn test_handles_are_numbered_in_creation_order() {
        let connector = SimulatedConnector::new();
        let first = connector.create(&settings()).unwrap();
        let second = connector.create(&settings()).unwrap();
        assert_eq!(connector.bus().created_handles(), 2);
        drop(first);
        drop(second);
        assert_eq!(
            connector.bus().lifecycle(),
            vec![
                Lifecycle::Created(1),
                Lifecycle::Created(2),
                Lifecycle::Dropped(1),
                Lifecycle::Dropped(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_releases_handle() {
        let connector = SimulatedConnector::new();
        let client = connector.create(&settings()).unwrap();
        assert_eq!(connector.bus().live_handles(), 1);
        drop(client);
        assert_eq!(connector.bus().live_handles(), 0);
        assert_eq!(
            connector.bus().lifecycle(),
            vec![Lifecycle::Created(1), Lifecycle::Dropped(1)]
        );
    }
}
