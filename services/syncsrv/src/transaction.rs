//! Transaction queue
//!
//! A transaction is a named, ordered list of link actions built through
//! `TransactionBuilder` and immutable afterwards. `TransactionQueue::submit`
//! is a non-blocking enqueue; the engine worker is the sole drainer and runs
//! one transaction to completion before touching the next, so actions of two
//! transactions never interleave on the link. A transport failure mid-run
//! aborts the remainder of that transaction only.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::scheduler::SyncCategory;
use crate::transport::{Characteristic, DeviceState};

/// One step of a transaction
#[derive(Debug, Clone)]
pub enum Action {
    /// Write pre-encoded frame bytes to a characteristic
    WriteFrame {
        characteristic: Characteristic,
        bytes: Vec<u8>,
    },
    /// Pause between writes (devices drop back-to-back frames)
    Wait(Duration),
    /// Subscribe or unsubscribe notifications
    SetNotify {
        characteristic: Characteristic,
        enable: bool,
    },
    /// Transition the engine's device state once execution reaches this point
    SetDeviceState(DeviceState),
}

/// An ordered batch of link actions, executed atomically with respect to
/// other transactions
///
/// A transaction carrying an owning sync category reports its failure back
/// to that category's timer: an abort mid-run sends the category into its
/// retry cadence instead of silently losing the request.
#[derive(Debug, Clone)]
pub struct Transaction {
    name: &'static str,
    actions: Vec<Action>,
    owner: Option<SyncCategory>,
}

impl Transaction {
    pub fn builder(name: &'static str) -> TransactionBuilder {
        TransactionBuilder {
            name,
            actions: Vec::new(),
            owner: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Sync category whose request this transaction carries, if any.
    pub fn owner(&self) -> Option<SyncCategory> {
        self.owner
    }
}

#[derive(Debug)]
pub struct TransactionBuilder {
    name: &'static str,
    actions: Vec<Action>,
    owner: Option<SyncCategory>,
}

impl TransactionBuilder {
    pub fn write(mut self, characteristic: Characteristic, bytes: Vec<u8>) -> Self {
        self.actions.push(Action::WriteFrame {
            characteristic,
            bytes,
        });
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.actions.push(Action::Wait(duration));
        self
    }

    pub fn notify(mut self, characteristic: Characteristic, enable: bool) -> Self {
        self.actions.push(Action::SetNotify {
            characteristic,
            enable,
        });
        self
    }

    pub fn device_state(mut self, state: DeviceState) -> Self {
        self.actions.push(Action::SetDeviceState(state));
        self
    }

    pub fn owned_by(mut self, category: SyncCategory) -> Self {
        self.owner = Some(category);
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            name: self.name,
            actions: self.actions,
            owner: self.owner,
        }
    }
}

/// Submission handle to the engine worker's transaction channel
#[derive(Debug, Clone)]
pub struct TransactionQueue {
    tx: mpsc::UnboundedSender<Transaction>,
}

impl TransactionQueue {
    /// Create a queue and the receiving end the engine worker drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transaction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a transaction without blocking. Fails only when the engine
    /// worker has stopped.
    pub fn submit(&self, transaction: Transaction) -> Result<()> {
        self.tx
            .send(transaction)
            .map_err(|e| SyncError::engine_stopped(format!("transaction channel closed: {e}")))
    }
}
