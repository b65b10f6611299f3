// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Active Enumeration Runner
 * DNS brute force, permutation resolving and the liveness check.
 * Intermediate results move between passes through per-domain temp
 * files at well-known paths.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{run_pair, ErrorRegister, PhaseOutput, Resolver};
use crate::types::ResultMap;
use crate::utils::{remove_duplicates, write_temp_file};

pub struct ActiveRunner {
    resolver: Arc<dyn Resolver>,
    tmp_dir: PathBuf,
    fanout: usize,
}

impl ActiveRunner {
    pub fn new(resolver: Arc<dyn Resolver>, tmp_dir: impl Into<PathBuf>, fanout: usize) -> Self {
        Self {
            resolver,
            tmp_dir: tmp_dir.into(),
            fanout: fanout.max(1),
        }
    }

    fn brute_temp_path(&self, seed: &str) -> PathBuf {
        self.tmp_dir.join(format!("tempDomain-{}.txt", seed))
    }

    fn permute_temp_path(&self, seed: &str) -> PathBuf {
        self.tmp_dir.join(format!("alterxDomain-{}.txt", seed))
    }

    fn live_temp_path(&self, seed: &str) -> PathBuf {
        self.tmp_dir.join(format!("subdomains-{}.txt", seed))
    }

    /// DNS brute force per seed, union with the passive results, then
    /// a permutation pass over the merged set. Partial results are
    /// returned alongside the first recorded error.
    pub async fn run_active_enum(
        &self,
        seeds: &[String],
        wordlist: &Path,
        threads: u32,
        passive_results: &ResultMap,
    ) -> PhaseOutput {
        let results = Arc::new(Mutex::new(ResultMap::new()));
        let register = Arc::new(ErrorRegister::default());

        stream::iter(seeds.to_vec())
            .map(|seed| {
                let resolver = self.resolver.clone();
                let results = results.clone();
                let register = register.clone();
                let wordlist = wordlist.to_path_buf();
                async move {
                    let producer_seed = seed.clone();
                    run_pair(
                        seed,
                        async move { resolver.brute(&producer_seed, &wordlist, threads).await },
                        results,
                        register,
                    )
                    .await;
                }
            })
            .buffer_unordered(self.fanout)
            .collect::<Vec<()>>()
            .await;

        info!("cleaning results after DNS bruteforce and creating temp files for DNS alterations");
        let mut hostnames = results.lock().clone();
        for seed in seeds {
            let entry = hostnames.entry(seed.clone()).or_default();
            if let Some(prior) = passive_results.get(seed) {
                entry.extend(prior.iter().cloned());
            }
            *entry = remove_duplicates(entry);
        }

        // A failed brute pass still feeds persistence; skip the
        // permutation pass so its inputs are never half-written.
        if let Some(err) = register.err() {
            return PhaseOutput {
                hostnames,
                error: Some(err),
            };
        }

        for seed in seeds {
            let path = self.brute_temp_path(seed);
            if let Err(e) = write_temp_file(&path, &hostnames[seed]) {
                error!(seed = %seed, error = %e, "failed to materialize temp file for permutations");
                return PhaseOutput {
                    hostnames,
                    error: Some(e),
                };
            }
        }

        let results = Arc::new(Mutex::new(hostnames));
        stream::iter(seeds.to_vec())
            .map(|seed| {
                let resolver = self.resolver.clone();
                let results = results.clone();
                let register = register.clone();
                let input = self.brute_temp_path(&seed);
                let output = self.permute_temp_path(&seed);
                async move {
                    let producer_seed = seed.clone();
                    run_pair(
                        seed,
                        async move {
                            resolver
                                .permute(&producer_seed, &input, &output, threads)
                                .await
                        },
                        results,
                        register,
                    )
                    .await;
                }
            })
            .buffer_unordered(self.fanout)
            .collect::<Vec<()>>()
            .await;

        let error = register.err();
        if error.is_none() {
            for seed in seeds {
                for path in [self.brute_temp_path(seed), self.permute_temp_path(seed)] {
                    if let Err(e) = std::fs::remove_file(&path) {
                        debug!(path = %path.display(), error = %e, "could not delete temp file");
                    }
                }
            }
        }

        info!("cleaning results after DNS alterations");
        let mut hostnames = results.lock().clone();
        for seed in seeds {
            let entry = hostnames.entry(seed.clone()).or_default();
            *entry = remove_duplicates(entry);
        }

        PhaseOutput { hostnames, error }
    }

    /// Re-resolve every known hostname per seed domain. A domain whose
    /// resolver run fails has no entry in the returned map, which the
    /// caller treats as "mark everything under it dead".
    pub async fn check_live_subdomains(&self, subdomains: &ResultMap, threads: u32) -> ResultMap {
        info!("running DNS liveness check");
        let mut results = ResultMap::new();

        for (domain, list) in subdomains {
            let path = self.live_temp_path(domain);
            if let Err(e) = write_temp_file(&path, list) {
                warn!(domain = %domain, error = %e, "failed to write liveness temp file");
                continue;
            }

            match self.resolver.resolve_file(&path, threads).await {
                Ok(lines) => {
                    let live: Vec<String> = lines
                        .into_iter()
                        .map(|line| line.trim().to_string())
                        .filter(|line| !line.is_empty())
                        .collect();
                    for hostname in &live {
                        debug!(domain = %domain, hostname = %hostname, "live hostname");
                    }
                    results.insert(domain.clone(), live);
                }
                Err(e) => {
                    error!(domain = %domain, error = %e, "liveness check failed");
                }
            }

            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not delete temp file");
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EnumError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct StaticResolver {
        brute: HashMap<String, Result<Vec<String>, EnumError>>,
        permute: HashMap<String, Result<Vec<String>, EnumError>>,
        live: HashMap<String, Result<Vec<String>, EnumError>>,
    }

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn passive(&self, _seed: &str) -> Result<Vec<String>, EnumError> {
            Ok(vec![])
        }

        async fn brute(
            &self,
            seed: &str,
            _wordlist: &Path,
            _threads: u32,
        ) -> Result<Vec<String>, EnumError> {
            self.brute.get(seed).cloned().unwrap_or_else(|| Ok(vec![]))
        }

        async fn permute(
            &self,
            seed: &str,
            input: &Path,
            _output: &Path,
            _threads: u32,
        ) -> Result<Vec<String>, EnumError> {
            // the brute pass must have materialized the input file
            assert!(input.exists(), "permutation input file missing");
            self.permute.get(seed).cloned().unwrap_or_else(|| Ok(vec![]))
        }

        async fn resolve_file(&self, list: &Path, _threads: u32) -> Result<Vec<String>, EnumError> {
            let name = list.file_name().unwrap().to_string_lossy().to_string();
            let domain = name
                .strip_prefix("subdomains-")
                .and_then(|n| n.strip_suffix(".txt"))
                .unwrap()
                .to_string();
            self.live.get(&domain).cloned().unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn active_merges_brute_passive_and_permutations() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = StaticResolver::default();
        resolver.brute.insert(
            "example.com".to_string(),
            Ok(strings(&["a.example.com"])),
        );
        resolver.permute.insert(
            "example.com".to_string(),
            Ok(strings(&["x1.example.com", "a.example.com"])),
        );
        let runner = ActiveRunner::new(Arc::new(resolver), dir.path(), 4);

        let mut passive = ResultMap::new();
        passive.insert("example.com".to_string(), strings(&["x.example.com"]));

        let output = runner
            .run_active_enum(
                &["example.com".to_string()],
                Path::new("wordlist.txt"),
                10,
                &passive,
            )
            .await;

        assert!(output.error.is_none());
        assert_eq!(
            output.hostnames["example.com"],
            strings(&["a.example.com", "x.example.com", "x1.example.com"])
        );
        // temp files removed on success
        assert!(!dir.path().join("tempDomain-example.com.txt").exists());
        assert!(!dir.path().join("alterxDomain-example.com.txt").exists());
    }

    #[tokio::test]
    async fn brute_failure_returns_passive_union_and_skips_permutations() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = StaticResolver::default();
        resolver.brute.insert(
            "example.com".to_string(),
            Err(EnumError::Tool {
                tool: "dnsx".to_string(),
                reason: "exit status 1".to_string(),
            }),
        );
        let runner = ActiveRunner::new(Arc::new(resolver), dir.path(), 4);

        let mut passive = ResultMap::new();
        passive.insert("example.com".to_string(), strings(&["x.example.com"]));

        let output = runner
            .run_active_enum(
                &["example.com".to_string()],
                Path::new("wordlist.txt"),
                10,
                &passive,
            )
            .await;

        assert!(output.error.is_some());
        assert_eq!(output.hostnames["example.com"], strings(&["x.example.com"]));
        assert!(!dir.path().join("tempDomain-example.com.txt").exists());
    }

    #[tokio::test]
    async fn check_live_omits_failed_domains_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = StaticResolver::default();
        resolver
            .live
            .insert("example.com".to_string(), Ok(strings(&["a.example.com"])));
        resolver.live.insert(
            "broken.com".to_string(),
            Err(EnumError::Tool {
                tool: "dnsx".to_string(),
                reason: "exit status 1".to_string(),
            }),
        );
        let runner = ActiveRunner::new(Arc::new(resolver), dir.path(), 4);

        let mut subs = ResultMap::new();
        subs.insert(
            "example.com".to_string(),
            strings(&["a.example.com", "b.example.com"]),
        );
        subs.insert("broken.com".to_string(), strings(&["c.broken.com"]));

        let live = runner.check_live_subdomains(&subs, 10).await;

        assert_eq!(live["example.com"], strings(&["a.example.com"]));
        assert!(!live.contains_key("broken.com"));
        assert!(!dir.path().join("subdomains-example.com.txt").exists());
        assert!(!dir.path().join("subdomains-broken.com.txt").exists());
    }
}
