// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Shared Broker State
 * Process-wide registry of declared exchanges, queues, bindings,
 * consumers and handlers. The broker is authoritative but slow; this
 * registry is the local mirror that answers existence probes without a
 * round-trip. It must be updated on every successful declare/cancel.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::errors::{AsmResult, BrokerError};

/// The consumed-message shape handed to queue handlers. Carries exactly
/// what dispatch needs so tests can construct deliveries directly.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Dispatch function installed per queue; at most one handler per queue
pub type DeliveryHandler =
    Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, AsmResult<()>> + Send + Sync>;

/// Queue metadata recorded at declare time
#[derive(Debug, Clone, Default)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
    pub args: BTreeMap<String, serde_json::Value>,
}

/// Registry of everything this process has declared on the broker.
/// One lock per map family; critical sections stay short.
#[derive(Default)]
pub struct SharedBrokerState {
    exchanges: RwLock<HashMap<String, String>>,
    queues: RwLock<HashMap<String, HashMap<String, QueueInfo>>>,
    bindings: RwLock<HashMap<String, HashMap<String, Vec<String>>>>,
    consumers: RwLock<HashMap<String, Vec<String>>>,
    handlers: RwLock<HashMap<String, DeliveryHandler>>,
}

/// Compare declare-arg values tolerating the string/number ambiguity
/// of YAML-sourced args ("1" vs 1).
fn args_value_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a == b {
        return true;
    }
    let canonical = |v: &serde_json::Value| -> Option<i64> {
        match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    };
    match (canonical(a), canonical(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl SharedBrokerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ensure the inner queue/binding maps for an exchange exist.
    /// Idempotent.
    pub fn initialize_exchange(&self, exchange: &str) {
        self.queues
            .write()
            .entry(exchange.to_string())
            .or_default();
        self.bindings
            .write()
            .entry(exchange.to_string())
            .or_default();
    }

    /// Upsert an exchange kind. A name maps to at most one kind for the
    /// process lifetime; redeclaration with a different kind is rejected.
    pub fn set_exchange(&self, exchange: &str, kind: &str) -> AsmResult<()> {
        let mut exchanges = self.exchanges.write();
        if let Some(existing) = exchanges.get(exchange) {
            if existing != kind {
                return Err(BrokerError::ExchangeKindMismatch {
                    exchange: exchange.to_string(),
                    existing: existing.clone(),
                    requested: kind.to_string(),
                }
                .into());
            }
        }
        exchanges.insert(exchange.to_string(), kind.to_string());
        Ok(())
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<String> {
        self.exchanges.read().get(exchange).cloned()
    }

    pub fn exchanges(&self) -> HashMap<String, String> {
        self.exchanges.read().clone()
    }

    pub fn set_queue(&self, exchange: &str, queue: &str, info: QueueInfo) {
        self.queues
            .write()
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.to_string(), info);
    }

    pub fn queue(&self, exchange: &str, queue: &str) -> Option<QueueInfo> {
        self.queues
            .read()
            .get(exchange)
            .and_then(|queues| queues.get(queue))
            .cloned()
    }

    pub fn queues(&self) -> HashMap<String, HashMap<String, QueueInfo>> {
        self.queues.read().clone()
    }

    pub fn set_bindings(&self, exchange: &str, queue: &str, routing_keys: Vec<String>) {
        self.bindings
            .write()
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.to_string(), routing_keys);
    }

    pub fn bindings(&self, exchange: &str, queue: &str) -> Option<Vec<String>> {
        self.bindings
            .read()
            .get(exchange)
            .and_then(|bindings| bindings.get(queue))
            .cloned()
    }

    pub fn add_consumer(&self, queue: &str, tag: &str) {
        let mut consumers = self.consumers.write();
        let tags = consumers.entry(queue.to_string()).or_default();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    pub fn consumers(&self, queue: &str) -> Option<Vec<String>> {
        self.consumers.read().get(queue).cloned()
    }

    /// Remove a consumer tag wherever it is registered
    pub fn delete_consumer_by_tag(&self, tag: &str) {
        let mut consumers = self.consumers.write();
        for tags in consumers.values_mut() {
            tags.retain(|t| t != tag);
        }
    }

    /// Install the dispatch function for a queue. Overwrite is allowed
    /// and atomic.
    pub fn add_handler(&self, queue: &str, handler: DeliveryHandler) {
        self.handlers.write().insert(queue.to_string(), handler);
    }

    pub fn handler(&self, queue: &str) -> Option<DeliveryHandler> {
        self.handlers.read().get(queue).cloned()
    }

    pub fn delete_handler(&self, queue: &str) {
        self.handlers.write().remove(queue);
    }

    /// Remove a queue from every exchange and drop its handler and
    /// consumer set
    pub fn delete_queue_by_name(&self, queue: &str) {
        {
            let mut queues = self.queues.write();
            for per_exchange in queues.values_mut() {
                per_exchange.remove(queue);
            }
        }
        {
            let mut bindings = self.bindings.write();
            for per_exchange in bindings.values_mut() {
                per_exchange.remove(queue);
            }
        }
        self.consumers.write().remove(queue);
        self.handlers.write().remove(queue);
    }

    /// True iff some exchange maps to `queue` and the recorded declare
    /// args match `args`. Keys the registry never recorded don't count
    /// against the probe.
    pub fn exist_queue(&self, queue: &str, args: &BTreeMap<String, serde_json::Value>) -> bool {
        let queues = self.queues.read();
        let Some(info) = queues
            .values()
            .find_map(|per_exchange| per_exchange.get(queue))
        else {
            return false;
        };
        args.iter().all(|(key, value)| match info.args.get(key) {
            Some(recorded) => args_value_eq(recorded, value),
            None => true,
        })
    }

    /// `exist_queue` plus a non-empty consumer set
    pub fn exist_consumers_for_queue(
        &self,
        queue: &str,
        args: &BTreeMap<String, serde_json::Value>,
    ) -> bool {
        if !self.exist_queue(queue, args) {
            return false;
        }
        self.consumers
            .read()
            .get(queue)
            .is_some_and(|tags| !tags.is_empty())
    }
}
