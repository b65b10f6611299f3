// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Passive Enumeration Runner
 * Fans producer/collector pairs out over the seed domains, merges
 * prior results and de-duplicates.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use super::{run_pair, ErrorRegister, PhaseOutput, Resolver};
use crate::types::ResultMap;
use crate::utils::remove_duplicates;

pub struct PassiveRunner {
    resolver: Arc<dyn Resolver>,
    fanout: usize,
}

impl PassiveRunner {
    pub fn new(resolver: Arc<dyn Resolver>, fanout: usize) -> Self {
        Self {
            resolver,
            fanout: fanout.max(1),
        }
    }

    /// Passive discovery for every seed domain, unioned with the
    /// previously known hostnames. A tool failure surfaces as the
    /// phase error while the partial results are still returned.
    pub async fn run_passive_enum(&self, seeds: &[String], prev: &ResultMap) -> PhaseOutput {
        let results = Arc::new(Mutex::new(ResultMap::new()));
        let register = Arc::new(ErrorRegister::default());

        stream::iter(seeds.to_vec())
            .map(|seed| {
                let resolver = self.resolver.clone();
                let results = results.clone();
                let register = register.clone();
                async move {
                    info!(seed = %seed, "finding subdomains");
                    let producer_seed = seed.clone();
                    run_pair(
                        seed,
                        async move { resolver.passive(&producer_seed).await },
                        results,
                        register,
                    )
                    .await;
                }
            })
            .buffer_unordered(self.fanout)
            .collect::<Vec<()>>()
            .await;

        info!("cleaning results from passive scan");
        let mut hostnames = results.lock().clone();
        for seed in seeds {
            let entry = hostnames.entry(seed.clone()).or_default();
            if let Some(previous) = prev.get(seed) {
                entry.extend(previous.iter().cloned());
            }
            *entry = remove_duplicates(entry);
        }

        PhaseOutput {
            hostnames,
            error: register.err(),
        }
    }
}
