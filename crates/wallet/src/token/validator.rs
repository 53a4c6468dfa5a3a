//! Seam to the external SLP DAG validator.
//!
//! The wallet submits a [`ValidationRequest`] per unresolved token transaction and gets
//! a [`JobHandle`] back. Validators report through a [`ValidationSink`] from any thread;
//! a single worker drains the sink channel and applies each verdict under the wallet
//! lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use slpwallet_consensus::{hash256_to_hex, Hash256};
use slpwallet_log::{log_debug, log_error};
use slpwallet_primitives::Transaction;

use crate::error::WalletError;
use crate::source::TransactionSource;
use crate::token::{TokenClass, Validity};
use crate::wallet::WalletView;

pub struct ValidationRequest {
    pub txid: Hash256,
    pub tx: Transaction,
    pub class: TokenClass,
    pub token_id: Hash256,
    /// Read-only access to wallet state for the DAG walk.
    pub wallet: WalletView,
    /// Where to fetch ancestors the wallet does not hold.
    pub network: Option<Arc<dyn TransactionSource>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub id: u64,
    pub txid: Hash256,
}

impl JobHandle {
    pub fn new(txid: Hash256) -> Self {
        static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            txid,
        }
    }
}

pub trait DagValidator: Send + Sync {
    fn submit(
        &self,
        request: ValidationRequest,
        sink: ValidationSink,
    ) -> Result<JobHandle, WalletError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMessage {
    Completed { txid: Hash256, validity: Validity },
    Stop,
}

/// Completion side of a job. Cloneable and usable from any thread.
#[derive(Clone, Debug)]
pub struct ValidationSink {
    sender: Sender<ValidationMessage>,
}

impl ValidationSink {
    pub(crate) fn new(sender: Sender<ValidationMessage>) -> Self {
        Self { sender }
    }

    /// Reports a verdict. Returns false once the wallet is gone.
    pub fn complete(&self, txid: Hash256, validity: Validity) -> bool {
        self.sender
            .send(ValidationMessage::Completed { txid, validity })
            .is_ok()
    }

    /// Reports a raw validator code; codes outside the known set are dropped.
    pub fn complete_code(&self, txid: Hash256, code: u8) -> bool {
        match Validity::from_code(code) {
            Some(validity) => self.complete(txid, validity),
            None => {
                log_error!(
                    "validator returned unknown validity {code} for tx {}",
                    hash256_to_hex(&txid)
                );
                false
            }
        }
    }
}

/// Runs `apply` for each completion until `Stop`, disconnection, or `apply` reporting
/// that the wallet is gone.
pub(crate) fn spawn_worker(
    receiver: Receiver<ValidationMessage>,
    apply: impl Fn(Hash256, Validity) -> bool + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(message) = receiver.recv() {
            match message {
                ValidationMessage::Completed { txid, validity } => {
                    if !apply(txid, validity) {
                        break;
                    }
                }
                ValidationMessage::Stop => break,
            }
        }
        log_debug!("validation worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn worker_applies_until_stop() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let applied = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&applied);
        let handle = spawn_worker(receiver, move |txid, validity| {
            seen.lock().expect("lock").push((txid, validity));
            true
        });
        let sink = ValidationSink::new(sender.clone());
        assert!(sink.complete([1; 32], Validity::Valid));
        assert!(!sink.complete_code([2; 32], 7));
        assert!(sink.complete_code([3; 32], 3));
        sender.send(ValidationMessage::Stop).expect("stop");
        handle.join().expect("join");
        assert_eq!(
            *applied.lock().expect("lock"),
            vec![
                ([1; 32], Validity::Valid),
                ([3; 32], Validity::InvalidInsufficientInputs)
            ]
        );
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobHandle::new([1; 32]);
        let b = JobHandle::new([1; 32]);
        assert_ne!(a.id, b.id);
    }
}
