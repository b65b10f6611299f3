// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Orchestrator Integration Tests
 * Drives the full scan lifecycle through fake resolver, broker and
 * store implementations: terminal handoff, ACK/NACK correctness,
 * panic containment and the liveness rollback.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use asmm8::config::AppConfig;
use asmm8::db::{DomainStore, HostnameStore, SettingsStore};
use asmm8::enumeration::Resolver;
use asmm8::errors::{AsmResult, BrokerError, DbError, EnumError};
use asmm8::orchestrator::OrchestratorApi;
use asmm8::scan::{LaunchOutcome, ScanDeps, ScanOrchestrator, ToolInstaller};
use asmm8::types::{Domain, GeneralScanSettings, Hostname, ScanSettings};

const CONFIG_YAML: &str = r#"
Database:
  location: localhost
  port: 5432
  schema: public
  database: cptm8
  username: cptm8
  password: cptm8
RabbitMQ:
  location: localhost
  port: 5672
  username: guest
  password: guest
ASMM8:
  activeWordList: ./configs/wordlist.txt
  activeThreads: 10
ORCHESTRATORM8:
  Services:
    asmm8: http://127.0.0.1:8000
    naabum8: http://127.0.0.1:8001
  Exchanges:
    cptm8: topic
    notification: topic
  asmm8:
    Queue:
      - cptm8
      - qasmm8
      - "1"
    Routing-keys:
      - cptm8.asmm8.#
    Queue-arguments:
      x-max-length: 1
      x-overflow: reject-publish
    Consumer:
      - qasmm8
      - casmm8
      - "false"
    Publisher:
      - cptm8
      - cptm8.naabum8.get.scan
      - asmm8
"#;

const DOWNSTREAM_EXCHANGE: &str = "cptm8";
const DOWNSTREAM_KEY: &str = "cptm8.naabum8.get.scan";

#[derive(Debug, Clone)]
struct Publish {
    exchange: String,
    routing_key: String,
    payload: Option<serde_json::Value>,
}

struct FakeOrchestrator {
    queue_exists: AtomicBool,
    fail_downstream: AtomicBool,
    publishes: Mutex<Vec<Publish>>,
    acks: Mutex<Vec<(u64, bool)>>,
    nacks: Mutex<Vec<(u64, bool)>>,
}

impl FakeOrchestrator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue_exists: AtomicBool::new(true),
            fail_downstream: AtomicBool::new(false),
            publishes: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            nacks: Mutex::new(Vec::new()),
        })
    }

    fn downstream(&self) -> Vec<Publish> {
        self.publishes
            .lock()
            .iter()
            .filter(|p| p.exchange == DOWNSTREAM_EXCHANGE)
            .cloned()
            .collect()
    }

    fn notifications(&self) -> Vec<Publish> {
        self.publishes
            .lock()
            .iter()
            .filter(|p| p.exchange == "notification")
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    async fn publish_to_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Option<serde_json::Value>,
        _source_tag: &str,
    ) -> AsmResult<()> {
        self.publishes.lock().push(Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
        });
        if exchange == DOWNSTREAM_EXCHANGE && self.fail_downstream.load(Ordering::Relaxed) {
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn ack_scan_completion(&self, delivery_tag: u64, completed: bool) -> AsmResult<()> {
        self.acks.lock().push((delivery_tag, completed));
        Ok(())
    }

    async fn nack_scan_message(&self, delivery_tag: u64, requeue: bool) -> AsmResult<()> {
        self.nacks.lock().push((delivery_tag, requeue));
        Ok(())
    }

    fn exist_queue(&self, _queue: &str, _args: &BTreeMap<String, serde_json::Value>) -> bool {
        self.queue_exists.load(Ordering::Relaxed)
    }

    fn exist_consumers_for_queue(
        &self,
        _queue: &str,
        _args: &BTreeMap<String, serde_json::Value>,
    ) -> bool {
        self.queue_exists.load(Ordering::Relaxed)
    }
}

struct FakeDomainStore {
    domains: Vec<Domain>,
    fail: bool,
}

#[async_trait]
impl DomainStore for FakeDomainStore {
    async fn get_all_enabled(&self) -> Result<Vec<Domain>, DbError> {
        if self.fail {
            return Err(DbError::Query {
                reason: "injected failure".to_string(),
            });
        }
        Ok(self.domains.clone())
    }
}

#[derive(Default)]
struct FakeHostnameStore {
    prev: HashMap<Uuid, Vec<Hostname>>,
    insert_changes: bool,
    upserts: Mutex<Vec<(Uuid, bool, Vec<String>)>>,
    live_by_domain: Mutex<Vec<(Uuid, bool)>>,
    live_by_name: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl HostnameStore for FakeHostnameStore {
    async fn get_all_by_domain(&self, domain_id: Uuid) -> Result<Vec<Hostname>, DbError> {
        Ok(self.prev.get(&domain_id).cloned().unwrap_or_default())
    }

    async fn insert_batch(
        &self,
        domain_id: Uuid,
        enabled: bool,
        names: &[String],
    ) -> Result<bool, DbError> {
        self.upserts
            .lock()
            .push((domain_id, enabled, names.to_vec()));
        Ok(self.insert_changes)
    }

    async fn update_live_by_domain(&self, domain_id: Uuid, live: bool) -> Result<u64, DbError> {
        self.live_by_domain.lock().push((domain_id, live));
        Ok(1)
    }

    async fn update_live_by_name(&self, name: &str, live: bool) -> Result<u64, DbError> {
        self.live_by_name.lock().push((name.to_string(), live));
        Ok(1)
    }
}

struct FakeSettingsStore {
    value: Option<bool>,
}

#[async_trait]
impl SettingsStore for FakeSettingsStore {
    async fn get(&self) -> Result<GeneralScanSettings, DbError> {
        match self.value {
            Some(value) => Ok(GeneralScanSettings {
                id: Uuid::new_v4(),
                settings: ScanSettings {
                    scan_newly_found_hostname: value,
                },
            }),
            None => Err(DbError::Query {
                reason: "injected failure".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeResolver {
    passive: HashMap<String, Vec<String>>,
    brute: HashMap<String, Vec<String>>,
    permute: HashMap<String, Vec<String>>,
    /// None marks a domain whose liveness run fails
    live: HashMap<String, Option<Vec<String>>>,
    panic_on_brute: bool,
    fail_brute: bool,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn passive(&self, seed: &str) -> Result<Vec<String>, EnumError> {
        self.calls.lock().push(format!("passive:{}", seed));
        Ok(self.passive.get(seed).cloned().unwrap_or_default())
    }

    async fn brute(
        &self,
        seed: &str,
        _wordlist: &Path,
        _threads: u32,
    ) -> Result<Vec<String>, EnumError> {
        self.calls.lock().push(format!("brute:{}", seed));
        if self.panic_on_brute {
            panic!("injected producer panic");
        }
        if self.fail_brute {
            return Err(EnumError::Tool {
                tool: "dnsx".to_string(),
                reason: "exit status 1".to_string(),
            });
        }
        Ok(self.brute.get(seed).cloned().unwrap_or_default())
    }

    async fn permute(
        &self,
        seed: &str,
        _input: &Path,
        _output: &Path,
        _threads: u32,
    ) -> Result<Vec<String>, EnumError> {
        self.calls.lock().push(format!("permute:{}", seed));
        Ok(self.permute.get(seed).cloned().unwrap_or_default())
    }

    async fn resolve_file(&self, list: &Path, _threads: u32) -> Result<Vec<String>, EnumError> {
        let name = list.file_name().unwrap().to_string_lossy().to_string();
        let domain = name
            .strip_prefix("subdomains-")
            .and_then(|n| n.strip_suffix(".txt"))
            .unwrap_or_default()
            .to_string();
        self.calls.lock().push(format!("live:{}", domain));
        match self.live.get(&domain) {
            Some(Some(lines)) => Ok(lines.clone()),
            _ => Err(EnumError::Tool {
                tool: "dnsx".to_string(),
                reason: "exit status 1".to_string(),
            }),
        }
    }
}

struct FakeInstaller {
    fail: bool,
}

#[async_trait]
impl ToolInstaller for FakeInstaller {
    async fn ensure_installed(&self) -> Result<(), EnumError> {
        if self.fail {
            Err(EnumError::Tool {
                tool: "subfinder".to_string(),
                reason: "not found on PATH".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn domain(name: &str) -> Domain {
    Domain {
        id: Uuid::new_v4(),
        name: name.to_string(),
        enabled: true,
    }
}

fn hostname(name: &str, domain_id: Uuid) -> Hostname {
    Hostname {
        id: Uuid::new_v4(),
        name: name.to_string(),
        found_first_time: Utc::now(),
        live: true,
        domain_id,
        enabled: true,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

struct Harness {
    scan: ScanOrchestrator,
    orchestrator: Arc<FakeOrchestrator>,
    hostnames: Arc<FakeHostnameStore>,
    resolver: Arc<FakeResolver>,
    _tmp: tempfile::TempDir,
}

fn harness(
    domains: FakeDomainStore,
    hostnames: FakeHostnameStore,
    resolver: FakeResolver,
    settings: FakeSettingsStore,
    install_fails: bool,
) -> Harness {
    let config: AppConfig = serde_yaml::from_str(CONFIG_YAML).unwrap();
    let orchestrator = FakeOrchestrator::new();
    let hostnames = Arc::new(hostnames);
    let resolver = Arc::new(resolver);
    let tmp = tempfile::tempdir().unwrap();

    let scan = ScanOrchestrator::new(ScanDeps {
        config: Arc::new(config),
        domains: Arc::new(domains),
        hostnames: hostnames.clone(),
        settings: Arc::new(settings),
        orchestrator: orchestrator.clone(),
        resolver: resolver.clone(),
        installer: Arc::new(FakeInstaller {
            fail: install_fails,
        }),
        tmp_dir: tmp.path().to_path_buf(),
    });

    Harness {
        scan,
        orchestrator,
        hostnames,
        resolver,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn happy_full_scan_persists_deduped_union_and_hands_off() {
    let seed = domain("example.com");
    let seed_id = seed.id;

    let mut resolver = FakeResolver::default();
    resolver
        .passive
        .insert("example.com".to_string(), strings(&["x.example.com"]));
    resolver
        .brute
        .insert("example.com".to_string(), strings(&["a.example.com"]));
    resolver
        .permute
        .insert("example.com".to_string(), strings(&["x1.example.com"]));

    let h = harness(
        FakeDomainStore {
            domains: vec![seed.clone()],
            fail: false,
        },
        FakeHostnameStore {
            insert_changes: true,
            ..Default::default()
        },
        resolver,
        FakeSettingsStore { value: Some(true) },
        false,
    );

    h.scan.active(true, vec![seed], 7).await;

    // stored hostnames: passive + brute + permutation, deduped
    let upserts = h.hostnames.upserts.lock();
    assert_eq!(upserts.len(), 1);
    let (id, enabled, names) = &upserts[0];
    assert_eq!(*id, seed_id);
    assert!(*enabled);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(
        sorted,
        strings(&["a.example.com", "x.example.com", "x1.example.com"])
    );

    // exactly one downstream handoff, status complete
    let downstream = h.orchestrator.downstream();
    assert_eq!(downstream.len(), 1);
    assert_eq!(downstream[0].routing_key, DOWNSTREAM_KEY);
    let payload = downstream[0].payload.as_ref().unwrap();
    assert_eq!(payload["status"], "complete");
    assert_eq!(payload["message"], "ASMM8 scan run successfully!");

    // changes emit admin + user security notifications
    let notifications = h.orchestrator.notifications();
    assert_eq!(notifications.len(), 2);
    for n in &notifications {
        assert_eq!(n.routing_key, "app.security.normal");
    }

    // exactly one ACK, no NACK
    assert_eq!(*h.orchestrator.acks.lock(), vec![(7, true)]);
    assert!(h.orchestrator.nacks.lock().is_empty());
}

#[tokio::test]
async fn empty_domain_list_short_circuits_with_null_handoff_and_ack() {
    let h = harness(
        FakeDomainStore {
            domains: Vec::new(),
            fail: false,
        },
        FakeHostnameStore::default(),
        FakeResolver::default(),
        FakeSettingsStore { value: Some(true) },
        false,
    );

    let outcome = h.scan.launch_full(9).await;
    assert_eq!(outcome, LaunchOutcome::NoTargets);

    let downstream = h.orchestrator.downstream();
    assert_eq!(downstream.len(), 1);
    assert!(downstream[0].payload.is_none());

    assert_eq!(*h.orchestrator.acks.lock(), vec![(9, true)]);
    assert!(h.orchestrator.notifications().is_empty());
    // no enumeration workers were started
    assert!(h.resolver.calls.lock().is_empty());
}

#[tokio::test]
async fn precheck_failure_nacks_and_raises_urgent_notification() {
    let h = harness(
        FakeDomainStore {
            domains: vec![domain("example.com")],
            fail: false,
        },
        FakeHostnameStore::default(),
        FakeResolver::default(),
        FakeSettingsStore { value: Some(true) },
        false,
    );
    h.orchestrator.queue_exists.store(false, Ordering::Relaxed);

    let outcome = h.scan.launch_full(5).await;
    assert_eq!(outcome, LaunchOutcome::BrokerNotReady);

    // the null handoff is still attempted
    let downstream = h.orchestrator.downstream();
    assert_eq!(downstream.len(), 1);
    assert!(downstream[0].payload.is_none());

    let notifications = h.orchestrator.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].routing_key, "app.error.urgent");

    assert_eq!(*h.orchestrator.nacks.lock(), vec![(5, false)]);
    assert!(h.orchestrator.acks.lock().is_empty());
    assert!(h.resolver.calls.lock().is_empty());
}

#[tokio::test]
async fn load_failure_warns_downstream_and_acks() {
    let h = harness(
        FakeDomainStore {
            domains: Vec::new(),
            fail: true,
        },
        FakeHostnameStore::default(),
        FakeResolver::default(),
        FakeSettingsStore { value: Some(true) },
        false,
    );

    let outcome = h.scan.launch_full(4).await;
    assert_eq!(outcome, LaunchOutcome::LoadFailed);

    assert_eq!(h.orchestrator.downstream().len(), 1);
    assert_eq!(h.orchestrator.notifications().len(), 1);
    assert_eq!(*h.orchestrator.acks.lock(), vec![(4, true)]);
}

#[tokio::test]
async fn install_failure_warns_downstream_and_acks() {
    let h = harness(
        FakeDomainStore {
            domains: vec![domain("example.com")],
            fail: false,
        },
        FakeHostnameStore::default(),
        FakeResolver::default(),
        FakeSettingsStore { value: Some(true) },
        true,
    );

    let outcome = h.scan.launch_full(2).await;
    assert_eq!(outcome, LaunchOutcome::InstallFailed);

    assert_eq!(h.orchestrator.downstream().len(), 1);
    assert_eq!(*h.orchestrator.acks.lock(), vec![(2, true)]);
    assert!(h.resolver.calls.lock().is_empty());
}

#[tokio::test]
async fn producer_panic_yields_warning_nack_and_partial_persistence() {
    let seed = domain("example.com");
    let seed_id = seed.id;

    let mut hostnames = FakeHostnameStore::default();
    hostnames
        .prev
        .insert(seed_id, vec![hostname("old.example.com", seed_id)]);

    let mut resolver = FakeResolver::default();
    resolver
        .passive
        .insert("example.com".to_string(), strings(&["x.example.com"]));
    resolver.panic_on_brute = true;

    let h = harness(
        FakeDomainStore {
            domains: vec![seed.clone()],
            fail: false,
        },
        hostnames,
        resolver,
        FakeSettingsStore { value: Some(true) },
        false,
    );

    // must not take the test process down
    h.scan.active(true, vec![seed], 3).await;

    // the passive union of prior results still reached the store
    let upserts = h.hostnames.upserts.lock();
    assert_eq!(upserts.len(), 1);
    let mut names = upserts[0].2.clone();
    names.sort();
    assert_eq!(names, strings(&["old.example.com", "x.example.com"]));

    // one warning handoff, NACK without requeue
    let downstream = h.orchestrator.downstream();
    assert_eq!(downstream.len(), 1);
    assert_eq!(
        downstream[0].payload.as_ref().unwrap()["status"],
        "warning"
    );
    assert_eq!(*h.orchestrator.acks.lock(), vec![(3, false)]);
}

#[tokio::test]
async fn tool_failure_yields_warning_but_acknowledges() {
    let seed = domain("example.com");

    let mut resolver = FakeResolver::default();
    resolver
        .passive
        .insert("example.com".to_string(), strings(&["x.example.com"]));
    resolver.fail_brute = true;

    let h = harness(
        FakeDomainStore {
            domains: vec![seed.clone()],
            fail: false,
        },
        FakeHostnameStore::default(),
        resolver,
        FakeSettingsStore { value: Some(true) },
        false,
    );

    h.scan.active(true, vec![seed], 11).await;

    // the phase failed but the session ran through: warning + ACK
    let downstream = h.orchestrator.downstream();
    assert_eq!(downstream.len(), 1);
    assert_eq!(
        downstream[0].payload.as_ref().unwrap()["status"],
        "warning"
    );
    assert_eq!(*h.orchestrator.acks.lock(), vec![(11, true)]);

    // partial results still persisted
    let upserts = h.hostnames.upserts.lock();
    assert_eq!(upserts[0].2, strings(&["x.example.com"]));
}

#[tokio::test(start_paused = true)]
async fn failed_handoff_is_retried_then_escalated() {
    let seed = domain("example.com");

    let h = harness(
        FakeDomainStore {
            domains: vec![seed.clone()],
            fail: false,
        },
        FakeHostnameStore::default(),
        FakeResolver::default(),
        FakeSettingsStore { value: Some(true) },
        false,
    );
    h.orchestrator.fail_downstream.store(true, Ordering::Relaxed);

    h.scan.active(true, vec![seed], 6).await;

    // first attempt plus one retry, then the urgent escalation
    assert_eq!(h.orchestrator.downstream().len(), 2);
    let notifications = h.orchestrator.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].routing_key, "app.error.urgent");

    // the delivery tag is still settled exactly once
    assert_eq!(*h.orchestrator.acks.lock(), vec![(6, true)]);
}

#[tokio::test]
async fn check_live_marks_missing_hostnames_dead_and_rolls_back_failed_domains() {
    let healthy = domain("example.com");
    let broken = domain("broken.com");
    let broken_id = broken.id;

    let mut hostnames = FakeHostnameStore::default();
    hostnames.prev.insert(
        healthy.id,
        vec![
            hostname("a.example.com", healthy.id),
            hostname("b.example.com", healthy.id),
            hostname("c.example.com", healthy.id),
        ],
    );
    hostnames
        .prev
        .insert(broken_id, vec![hostname("z.broken.com", broken_id)]);

    let mut resolver = FakeResolver::default();
    resolver.live.insert(
        "example.com".to_string(),
        Some(strings(&["a.example.com"])),
    );
    resolver.live.insert("broken.com".to_string(), None);

    let h = harness(
        FakeDomainStore {
            domains: vec![healthy.clone(), broken.clone()],
            fail: false,
        },
        hostnames,
        resolver,
        FakeSettingsStore { value: Some(true) },
        false,
    );

    h.scan.check_live(vec![healthy, broken]).await;

    // b and c dropped out of the live set; a survived
    let dead: Vec<String> = h
        .hostnames
        .live_by_name
        .lock()
        .iter()
        .map(|(name, live)| {
            assert!(!live);
            name.clone()
        })
        .collect();
    assert_eq!(dead, strings(&["b.example.com", "c.example.com"]));

    // the failed domain is rolled back whole
    assert_eq!(*h.hostnames.live_by_domain.lock(), vec![(broken_id, false)]);
}
