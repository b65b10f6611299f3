// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Enumeration Pipeline Plumbing
 * Producer/collector pairs over external tools, shared error register
 * and the resolver seam the runners fan out through.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod active;
pub mod passive;
pub mod resolver;

pub use active::ActiveRunner;
pub use passive::PassiveRunner;
pub use resolver::CommandResolver;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::errors::EnumError;
use crate::types::ResultMap;

/// The external tool surface. Production shells out to subfinder, dnsx
/// and alterx; tests substitute a fake so the whole scan pipeline runs
/// without processes.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Passive discovery for a seed domain (subfinder)
    async fn passive(&self, seed: &str) -> Result<Vec<String>, EnumError>;

    /// DNS brute-force with a wordlist (dnsx -d)
    async fn brute(
        &self,
        seed: &str,
        wordlist: &Path,
        threads: u32,
    ) -> Result<Vec<String>, EnumError>;

    /// Permutations of known hostnames, then resolution of the
    /// candidates (alterx piped into dnsx through temp files)
    async fn permute(
        &self,
        seed: &str,
        input: &Path,
        output: &Path,
        threads: u32,
    ) -> Result<Vec<String>, EnumError>;

    /// Re-resolve a file of known hostnames (dnsx -l), used by the
    /// liveness check
    async fn resolve_file(&self, list: &Path, threads: u32) -> Result<Vec<String>, EnumError>;
}

/// First-write-wins error slot shared by a phase's fan-out. Additional
/// errors are logged but not retained.
#[derive(Default)]
pub struct ErrorRegister {
    slot: Mutex<Option<EnumError>>,
}

impl ErrorRegister {
    pub fn record(&self, err: EnumError) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!(error = %err, "additional enumeration error dropped by register");
        }
    }

    pub fn err(&self) -> Option<EnumError> {
        self.slot.lock().clone()
    }
}

/// Result of one enumeration phase. A failed phase still carries its
/// partial results so persistence never rolls the store back to zero.
#[derive(Debug, Default)]
pub struct PhaseOutput {
    pub hostnames: ResultMap,
    pub error: Option<EnumError>,
}

/// Run one producer/collector pair for a seed domain.
///
/// The producer runs the tool future, filters its output to non-empty
/// hostnames containing the seed, and publishes each on a channel it
/// owns; dropping the sender is the single rendezvous point the
/// collector terminates on. A panicking task is captured here as a
/// panic-kind register entry and never unwinds into the caller.
pub(crate) async fn run_pair<P>(
    seed: String,
    producer: P,
    results: Arc<Mutex<ResultMap>>,
    register: Arc<ErrorRegister>,
) where
    P: Future<Output = Result<Vec<String>, EnumError>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(1);

    let producer_seed = seed.clone();
    let producer_register = register.clone();
    let producer_handle = tokio::spawn(async move {
        match producer.await {
            Ok(lines) => {
                for line in lines {
                    let line = line.trim();
                    if !line.is_empty() && line.contains(&producer_seed) {
                        if tx.send(line.to_string()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(seed = %producer_seed, error = %e, "enumeration producer failed");
                producer_register.record(e);
            }
        }
        // sender drops here, closing the channel on both paths
    });

    let collector_seed = seed.clone();
    let collector_results = results.clone();
    let collector_handle = tokio::spawn(async move {
        while let Some(hostname) = rx.recv().await {
            collector_results
                .lock()
                .entry(collector_seed.clone())
                .or_default()
                .push(hostname);
        }
        info!(seed = %collector_seed, "collector drained");
    });

    for (role, handle) in [
        ("producer", producer_handle),
        ("collector", collector_handle),
    ] {
        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                error!(seed = %seed, role, "enumeration task panicked");
                register.record(EnumError::Panic {
                    context: format!("{} task for `{}`", role, seed),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_collects_filtered_producer_output() {
        let results = Arc::new(Mutex::new(ResultMap::new()));
        let register = Arc::new(ErrorRegister::default());

        run_pair(
            "example.com".to_string(),
            async {
                Ok(vec![
                    "a.example.com".to_string(),
                    "".to_string(),
                    "unrelated.org".to_string(),
                    "b.example.com".to_string(),
                ])
            },
            results.clone(),
            register.clone(),
        )
        .await;

        let map = results.lock();
        assert_eq!(
            map["example.com"],
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
        assert!(register.err().is_none());
    }

    #[tokio::test]
    async fn pair_records_producer_error_and_collects_nothing() {
        let results = Arc::new(Mutex::new(ResultMap::new()));
        let register = Arc::new(ErrorRegister::default());

        run_pair(
            "example.com".to_string(),
            async {
                Err(EnumError::Tool {
                    tool: "subfinder".to_string(),
                    reason: "exit status 1".to_string(),
                })
            },
            results.clone(),
            register.clone(),
        )
        .await;

        assert!(results.lock().is_empty());
        assert!(matches!(register.err(), Some(EnumError::Tool { .. })));
    }

    #[tokio::test]
    async fn pair_captures_producer_panic() {
        let results = Arc::new(Mutex::new(ResultMap::new()));
        let register = Arc::new(ErrorRegister::default());

        run_pair(
            "example.com".to_string(),
            async { panic!("boom") },
            results.clone(),
            register.clone(),
        )
        .await;

        let err = register.err().expect("panic should be recorded");
        assert!(err.is_panic());
    }

    #[test]
    fn register_keeps_first_error_only() {
        let register = ErrorRegister::default();
        register.record(EnumError::Tool {
            tool: "dnsx".to_string(),
            reason: "first".to_string(),
        });
        register.record(EnumError::Tool {
            tool: "alterx".to_string(),
            reason: "second".to_string(),
        });

        match register.err() {
            Some(EnumError::Tool { reason, .. }) => assert_eq!(reason, "first"),
            other => panic!("unexpected register content: {:?}", other),
        }
    }
}
