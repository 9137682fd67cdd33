//! Normalized submission lifecycle
//!
//! Adapts a chain-specific broadcast (a one-shot acknowledgment followed
//! by zero or more confirmation/receipt notifications) into a fixed
//! four-stage sequence:
//!
//! `hash` (broadcast accepted) -> `confirmation` (zero or more, advisory)
//! -> `receipt` (exactly once, terminal) | `error` (terminal)
//!
//! The hash is immutable once assigned and the stage only advances
//! forward. If the broadcast fails before a hash is assigned, the handle
//! terminates with `error` and no partial state.

use ethers::types::{Address, Bytes, H256};
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One decoded receipt log entry (topics + data)
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

/// Chain-agnostic receipt for a mined transaction
#[derive(Debug, Clone, Serialize)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    /// Chain-level status flag. A `true` here can still hide a logical
    /// contract failure; that distinction is the meta parser's job.
    pub success: bool,
    pub logs: Vec<ReceiptLog>,
}

/// Lifecycle stages of one broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubmissionStage {
    /// Broadcast issued, hash not yet acknowledged
    Pending,
    /// Hash assigned by the node
    Broadcast,
    /// Included in a block, confirmations accumulating
    Confirmed,
    /// Receipt delivered, terminal
    Receipted,
    /// Terminal failure
    Failed,
}

/// Discrete lifecycle events republished by the adapter
#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    Hash { hash: String },
    Confirmation { hash: String, confirmations: u64 },
    Receipt { receipt: TxReceipt },
    Error { message: String },
}

#[derive(Debug)]
struct Inner {
    hash: OnceLock<String>,
    stage: Mutex<SubmissionStage>,
    events: broadcast::Sender<SubmissionEvent>,
}

/// Publisher half of a submission lifecycle. Held by the chain adapter
/// driving the broadcast; enforces the stage machine so downstream
/// consumers never observe a backward transition or a second receipt.
pub struct SubmissionFeed {
    inner: Arc<Inner>,
}

/// Subscriber half handed back to callers and to the tracker.
#[derive(Clone, Debug)]
pub struct SubmissionHandle {
    inner: Arc<Inner>,
}

/// Open a new lifecycle pair.
pub fn open() -> (SubmissionFeed, SubmissionHandle) {
    let inner = Arc::new(Inner {
        hash: OnceLock::new(),
        stage: Mutex::new(SubmissionStage::Pending),
        events: broadcast::channel(64).0,
    });
    (
        SubmissionFeed {
            inner: inner.clone(),
        },
        SubmissionHandle { inner },
    )
}

impl SubmissionFeed {
    /// Broadcast accepted: assign the hash and enter `Broadcast`.
    pub fn hash(&self, hash: impl Into<String>) {
        let hash = hash.into();
        let mut stage = self.inner.stage.lock().unwrap();
        if *stage != SubmissionStage::Pending {
            warn!(%hash, stage = ?*stage, "ignoring hash after broadcast stage");
            return;
        }
        if self.inner.hash.set(hash.clone()).is_err() {
            return;
        }
        *stage = SubmissionStage::Broadcast;
        drop(stage);

        debug!(%hash, "submission broadcast accepted");
        let _ = self.inner.events.send(SubmissionEvent::Hash { hash });
    }

    /// Advisory confirmation notification. Requires an assigned hash.
    pub fn confirmation(&self, confirmations: u64) {
        let mut stage = self.inner.stage.lock().unwrap();
        match *stage {
            SubmissionStage::Broadcast | SubmissionStage::Confirmed => {
                *stage = SubmissionStage::Confirmed;
            }
            _ => return,
        }
        drop(stage);

        let hash = self.inner.hash.get().cloned().unwrap_or_default();
        let _ = self.inner.events.send(SubmissionEvent::Confirmation {
            hash,
            confirmations,
        });
    }

    /// Terminal receipt. Delivered at most once per handle.
    pub fn receipt(&self, receipt: TxReceipt) {
        let mut stage = self.inner.stage.lock().unwrap();
        match *stage {
            SubmissionStage::Broadcast | SubmissionStage::Confirmed => {
                *stage = SubmissionStage::Receipted;
            }
            other => {
                warn!(stage = ?other, "ignoring receipt in terminal or pre-broadcast stage");
                return;
            }
        }
        drop(stage);

        crate::metrics::record_tx_receipted();
        let _ = self.inner.events.send(SubmissionEvent::Receipt { receipt });
    }

    /// Terminal error. Ignored once a receipt has been delivered.
    pub fn error(&self, message: impl Into<String>) {
        let mut stage = self.inner.stage.lock().unwrap();
        if *stage == SubmissionStage::Receipted || *stage == SubmissionStage::Failed {
            return;
        }
        *stage = SubmissionStage::Failed;
        drop(stage);

        crate::metrics::record_tx_failed();
        let _ = self.inner.events.send(SubmissionEvent::Error {
            message: message.into(),
        });
    }
}

impl SubmissionHandle {
    /// Transaction hash, once the broadcast has been accepted.
    pub fn hash(&self) -> Option<String> {
        self.inner.hash.get().cloned()
    }

    pub fn stage(&self) -> SubmissionStage {
        *self.inner.stage.lock().unwrap()
    }

    /// Subscribe to the lifecycle event stream. Subscribers added after
    /// a stage transition do not see earlier events; the assigned hash
    /// and current stage remain readable on the handle itself.
    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
        self.inner.events.subscribe()
    }
}
