//! Transport seam
//!
//! The engine talks to the device through the `Transport` trait (outbound
//! writes and notify subscriptions) and a bounded mpsc of `TransportEvent`s
//! (inbound notifications and connection changes). The event receiver is
//! consumed exclusively by the engine worker; producers only enqueue. A real
//! BLE backend lives behind this seam, as does the in-process simulator.

use async_trait::async_trait;

use crate::error::Result;

/// Characteristic handle on the device link
pub type Characteristic = u16;

/// Link-level connection state reported by the transport backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Logical device lifecycle as tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Connecting,
    Initialized,
}

/// Outbound half of the device link
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw frame bytes to a characteristic.
    async fn write(&self, characteristic: Characteristic, bytes: &[u8]) -> Result<()>;

    /// Enable or disable notifications on a characteristic.
    async fn set_notify(&self, characteristic: Characteristic, enable: bool) -> Result<()>;
}

/// Inbound event from the transport backend
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Notification payload received on a characteristic
    Notification {
        characteristic: Characteristic,
        data: Vec<u8>,
    },
    /// Link state change
    ConnectionState(ConnectionState),
}
