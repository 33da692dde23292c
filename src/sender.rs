//! Delivery capability.
//!
//! The scheduler invokes a [`Sender`] once per attempt and interprets the
//! outcome: `Delivered` completes the record, `TransientFailure` reschedules
//! it per the retry policy, `PermanentFailure` dead-letters it immediately.
//! A sender that returns an error is treated as a transient failure.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use rand::Rng;

use crate::{config::defaults, message::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    TransientFailure,
    PermanentFailure,
}

pub trait Sender: Send + Sync + 'static {
    /// One delivery attempt. Called outside the engine lock; may block on
    /// the network and should impose its own deadline.
    fn send(
        &self,
        message: &Message,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<SendOutcome>> + Send>>;
}

/// Stand-in carrier for local runs: delivers with a fixed probability and
/// fails transiently otherwise.
#[derive(Clone)]
pub struct DemoSender {
    success_rate: f64,
}

impl DemoSender {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for DemoSender {
    fn default() -> Self {
        Self::new(defaults::DEMO_SUCCESS_RATE)
    }
}

impl Sender for DemoSender {
    fn send(
        &self,
        message: &Message,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<SendOutcome>> + Send>> {
        let success_rate = self.success_rate;
        let message_id = message.message_id.clone();

        Box::pin(async move {
            if rand::thread_rng().gen_bool(success_rate) {
                tracing::info!(%message_id, "sms sent");
                Ok(SendOutcome::Delivered)
            } else {
                tracing::warn!(%message_id, "sms send failed");
                Ok(SendOutcome::TransientFailure)
            }
        })
    }
}

/// Test sender: plays back a queue of outcomes and records the order in
/// which message ids were attempted.
#[derive(Clone)]
pub struct ScriptedSender {
    script: Arc<Mutex<VecDeque<SendOutcome>>>,
    fallback: SendOutcome,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSender {
    /// Plays `script` front to back, then falls back to transient failures.
    pub fn new(script: impl IntoIterator<Item = SendOutcome>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback: SendOutcome::TransientFailure,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns `outcome` for every attempt.
    pub fn always(outcome: SendOutcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: outcome,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Message ids in attempt order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("sender call log poisoned").clone()
    }
}

impl Sender for ScriptedSender {
    fn send(
        &self,
        message: &Message,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<SendOutcome>> + Send>> {
        let this = self.clone();
        let message_id = message.message_id.clone();

        Box::pin(async move {
            this.calls
                .lock()
                .expect("sender call log poisoned")
                .push(message_id);
            let outcome = this
                .script
                .lock()
                .expect("sender script poisoned")
                .pop_front()
                .unwrap_or(this.fallback);
            Ok(outcome)
        })
    }
}
