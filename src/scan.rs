// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Orchestrator
 * End-to-end scan lifecycle: precheck, load, install, passive/active
 * phases, persistence and the guaranteed terminal handoff. Every
 * terminal path publishes downstream and ACK/NACKs the triggering
 * delivery exactly once; a panicking session never takes down the
 * process.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{AppConfig, PublisherSpec, SERVICE_NAME};
use crate::db::{DomainStore, HostnameStore, SettingsStore};
use crate::enumeration::{ActiveRunner, PassiveRunner, Resolver};
use crate::errors::{DbError, EnumError};
use crate::notification::Notifier;
use crate::orchestrator::OrchestratorApi;
use crate::types::{Domain, ResultMap, TerminalStatus};
use crate::utils::{difference, install_tools};

/// Delay before the single retry of a failed terminal publish
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Tool provisioning seam; production checks the deployment image,
/// tests substitute a failing fake.
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    async fn ensure_installed(&self) -> Result<(), EnumError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolInstaller;

#[async_trait]
impl ToolInstaller for SystemToolInstaller {
    async fn ensure_installed(&self) -> Result<(), EnumError> {
        install_tools()
    }
}

/// Result of a launch request, mapped to HTTP responses by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The scan session was spawned
    Started,
    /// No enabled domains; nothing to do
    NoTargets,
    /// Precheck failed: the service queue does not exist
    BrokerNotReady,
    /// Enabled domains could not be loaded
    LoadFailed,
    /// The enumeration tools are not available
    InstallFailed,
}

/// Per-invocation session state. Terminal status derives from the
/// flags exactly once, in `finalize`.
#[derive(Debug, Default)]
struct ScanSession {
    delivery_tag: u64,
    completed: bool,
    failed: bool,
    panicked: bool,
    changes: bool,
}

impl ScanSession {
    fn terminal(&self) -> TerminalStatus {
        if self.failed {
            TerminalStatus::Warning
        } else if !self.completed {
            TerminalStatus::Incomplete
        } else {
            TerminalStatus::Complete
        }
    }
}

/// Dependencies composed by the service bootstrap; tests wire fakes
/// through the same struct.
pub struct ScanDeps {
    pub config: Arc<AppConfig>,
    pub domains: Arc<dyn DomainStore>,
    pub hostnames: Arc<dyn HostnameStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub orchestrator: Arc<dyn OrchestratorApi>,
    pub resolver: Arc<dyn Resolver>,
    pub installer: Arc<dyn ToolInstaller>,
    pub tmp_dir: PathBuf,
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    config: Arc<AppConfig>,
    domains: Arc<dyn DomainStore>,
    hostnames: Arc<dyn HostnameStore>,
    settings: Arc<dyn SettingsStore>,
    orchestrator: Arc<dyn OrchestratorApi>,
    notifier: Arc<Notifier>,
    resolver: Arc<dyn Resolver>,
    installer: Arc<dyn ToolInstaller>,
    tmp_dir: PathBuf,
}

impl ScanOrchestrator {
    pub fn new(deps: ScanDeps) -> Self {
        let notifier = Arc::new(Notifier::new(deps.orchestrator.clone()));
        Self {
            config: deps.config,
            domains: deps.domains,
            hostnames: deps.hostnames,
            settings: deps.settings,
            orchestrator: deps.orchestrator,
            notifier,
            resolver: deps.resolver,
            installer: deps.installer,
            tmp_dir: deps.tmp_dir,
        }
    }

    fn publisher_spec(&self) -> Option<PublisherSpec> {
        match self
            .config
            .orchestrator
            .service_messaging(SERVICE_NAME)
            .and_then(|m| m.publisher_spec())
        {
            Ok(spec) => Some(spec),
            Err(e) => {
                error!(error = %e, "publisher configuration is unusable");
                None
            }
        }
    }

    /// Publish an empty-body handoff so the downstream stage still
    /// runs when this one short-circuits
    async fn publish_null_handoff(&self) {
        let Some(publisher) = self.publisher_spec() else {
            return;
        };
        match self
            .orchestrator
            .publish_to_exchange(&publisher.exchange, &publisher.routing_key, None, &publisher.source_tag)
            .await
        {
            Ok(()) => info!("published handoff for next service (naabum8)"),
            Err(e) => error!(error = %e, "failed to publish handoff"),
        }
    }

    async fn ack(&self, delivery_tag: u64, completed: bool) {
        if delivery_tag == 0 {
            return;
        }
        if let Err(e) = self
            .orchestrator
            .ack_scan_completion(delivery_tag, completed)
            .await
        {
            error!(delivery_tag, error = %e, "failed to ACK/NACK scan trigger");
        }
    }

    /// Full scan entry point. Precheck, load and install run inline so
    /// the HTTP caller gets an accurate status; the session itself is
    /// spawned. Every exit path hands off downstream and settles the
    /// delivery tag exactly once.
    pub async fn launch_full(&self, delivery_tag: u64) -> LaunchOutcome {
        let (queue_name, queue_args) = match self
            .config
            .orchestrator
            .service_messaging(SERVICE_NAME)
            .and_then(|m| m.queue_spec().map(|spec| (spec.name, m.queue_arguments.clone())))
        {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "queue configuration is unusable");
                return LaunchOutcome::BrokerNotReady;
            }
        };

        if !self.orchestrator.exist_queue(&queue_name, &queue_args) {
            warn!("full scan cannot launch at this moment - broker queues do not exist");
            self.publish_null_handoff().await;
            self.notifier
                .publish_sys_error_notification(
                    "LaunchScan - full scan cannot launch at this moment - broker queues do not exist",
                    "urgent",
                    SERVICE_NAME,
                )
                .await;
            if delivery_tag > 0 {
                if let Err(e) = self.orchestrator.nack_scan_message(delivery_tag, false).await {
                    error!(delivery_tag, error = %e, "failed to NACK scan trigger");
                }
            }
            return LaunchOutcome::BrokerNotReady;
        }

        let targets = match self.domains.get_all_enabled().await {
            Ok(targets) => targets,
            Err(e) => {
                error!(error = %e, "full scan failed - error fetching enabled domains");
                self.publish_null_handoff().await;
                self.notifier
                    .publish_sys_error_notification(
                        "LaunchScan - error fetching enabled domains from the database",
                        "normal",
                        SERVICE_NAME,
                    )
                    .await;
                self.ack(delivery_tag, true).await;
                return LaunchOutcome::LoadFailed;
            }
        };

        if targets.is_empty() {
            info!("full scan finished - no targets in scope");
            self.publish_null_handoff().await;
            self.ack(delivery_tag, true).await;
            return LaunchOutcome::NoTargets;
        }

        if let Err(e) = self.installer.ensure_installed().await {
            error!(error = %e, "full scan failed - error during tools installation");
            self.publish_null_handoff().await;
            self.notifier
                .publish_sys_error_notification(
                    "LaunchScan - error during tools installation",
                    "normal",
                    SERVICE_NAME,
                )
                .await;
            self.ack(delivery_tag, true).await;
            return LaunchOutcome::InstallFailed;
        }

        info!("full scan accepted");
        let runner = self.clone();
        tokio::spawn(async move {
            runner.active(true, targets, delivery_tag).await;
        });
        LaunchOutcome::Started
    }

    /// Shared load/install preamble of the passive, active-only and
    /// check-live launches
    async fn prepare_targets(&self) -> Result<Vec<Domain>, LaunchOutcome> {
        let targets = match self.domains.get_all_enabled().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "error fetching enabled domains");
                return Err(LaunchOutcome::LoadFailed);
            }
        };
        if targets.is_empty() {
            info!("no targets in scope");
            return Err(LaunchOutcome::NoTargets);
        }
        if let Err(e) = self.installer.ensure_installed().await {
            error!(error = %e, "error during tools installation");
            return Err(LaunchOutcome::InstallFailed);
        }
        Ok(targets)
    }

    pub async fn launch_passive(&self) -> LaunchOutcome {
        match self.prepare_targets().await {
            Ok(targets) => {
                let runner = self.clone();
                tokio::spawn(async move {
                    runner.passive(targets).await;
                });
                LaunchOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    pub async fn launch_active(&self) -> LaunchOutcome {
        match self.prepare_targets().await {
            Ok(targets) => {
                let runner = self.clone();
                tokio::spawn(async move {
                    runner.active(false, targets, 0).await;
                });
                LaunchOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    pub async fn launch_check_live(&self) -> LaunchOutcome {
        match self.prepare_targets().await {
            Ok(targets) => {
                let runner = self.clone();
                tokio::spawn(async move {
                    runner.check_live(targets).await;
                });
                LaunchOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    /// Run the enumeration pipeline. With `full_scan` the terminal
    /// handoff and ACK/NACK are guaranteed on every exit, panics
    /// included.
    pub async fn active(&self, full_scan: bool, targets: Vec<Domain>, delivery_tag: u64) {
        let mut session = ScanSession {
            delivery_tag,
            ..Default::default()
        };

        let outcome = AssertUnwindSafe(self.run_pipeline(&mut session, &targets))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!("panic recovered in scan session");
            session.failed = true;
            session.completed = false;
        }

        if full_scan {
            self.finalize(&session).await;
        }
    }

    async fn run_pipeline(&self, session: &mut ScanSession, targets: &[Domain]) {
        let seeds: Vec<String> = targets.iter().map(|d| d.name.clone()).collect();
        let fanout = self.config.asm.fanout_width;

        let mut prev = ResultMap::new();
        for domain in targets {
            match self.previous_subdomains(domain).await {
                Ok(subs) => {
                    prev.insert(domain.name.clone(), subs);
                }
                Err(e) => {
                    session.failed = true;
                    warn!(domain = %domain.name, error = %e, "error getting previous subdomains");
                }
            }
        }

        info!("running passive scans");
        let passive_runner = PassiveRunner::new(self.resolver.clone(), fanout);
        let passive = passive_runner.run_passive_enum(&seeds, &prev).await;
        if let Some(err) = &passive.error {
            session.failed = true;
            if err.is_panic() {
                session.panicked = true;
            }
            error!(error = %err, "passive scan failed");
        }
        info!("passive scans have concluded");

        info!("running active scans");
        let active_runner = ActiveRunner::new(self.resolver.clone(), &self.tmp_dir, fanout);
        let active = active_runner
            .run_active_enum(
                &seeds,
                &self.config.asm.active_wordlist,
                self.config.asm.active_threads,
                &passive.hostnames,
            )
            .await;
        if let Some(err) = &active.error {
            session.failed = true;
            if err.is_panic() {
                session.panicked = true;
            }
            error!(error = %err, "active scan failed");
        }
        info!("active scans have concluded; fetching scan settings");

        let default_enabled = match self.settings.get().await {
            Ok(settings) => settings.settings.scan_newly_found_hostname,
            Err(e) => {
                warn!(error = %e, "error fetching scan settings, newly found hostnames default to enabled");
                true
            }
        };

        info!("updating results in database");
        for domain in targets {
            let names = active
                .hostnames
                .get(&domain.name)
                .cloned()
                .unwrap_or_default();
            match self
                .hostnames
                .insert_batch(domain.id, default_enabled, &names)
                .await
            {
                Ok(changed) => {
                    if changed {
                        session.changes = true;
                    }
                }
                Err(e) => {
                    session.failed = true;
                    warn!(domain = %domain.name, error = %e, "error inserting hostname batch");
                }
            }
        }

        // A captured task panic poisons completion: partial results
        // are persisted, but the trigger must not be acknowledged.
        session.completed = !session.panicked;

        if session.completed && session.changes {
            self.notifier
                .publish_security_notification_admin(
                    "New hostnames have been found",
                    "normal",
                    SERVICE_NAME,
                )
                .await;
            self.notifier
                .publish_security_notification_user(
                    "New hostnames have been found",
                    "normal",
                    SERVICE_NAME,
                )
                .await;
        }
        info!("scan has concluded");
    }

    /// The only place a full-scan session publishes its terminal
    /// status and settles the delivery tag
    async fn finalize(&self, session: &ScanSession) {
        let status = session.terminal();
        let payload = status.payload();
        let Some(publisher) = self.publisher_spec() else {
            return;
        };

        let mut published = self
            .orchestrator
            .publish_to_exchange(
                &publisher.exchange,
                &publisher.routing_key,
                Some(payload.clone()),
                &publisher.source_tag,
            )
            .await;
        if let Err(e) = &published {
            error!(error = %e, "failed to publish downstream handoff, retrying once");
            tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
            published = self
                .orchestrator
                .publish_to_exchange(
                    &publisher.exchange,
                    &publisher.routing_key,
                    Some(payload),
                    &publisher.source_tag,
                )
                .await;
            if let Err(e) = &published {
                error!(error = %e, "downstream handoff retry failed");
                self.notifier
                    .publish_sys_error_notification(
                        "CRITICAL: Failed to notify naabum8 after ASMM8 scan",
                        "urgent",
                        SERVICE_NAME,
                    )
                    .await;
            }
        }
        if published.is_ok() {
            info!(status = ?status, "published downstream handoff for next service (naabum8)");
        }

        self.ack(session.delivery_tag, session.completed).await;
    }

    /// Passive-only flow: enumerate, persist, no downstream handoff
    pub async fn passive(&self, targets: Vec<Domain>) {
        let seeds: Vec<String> = targets.iter().map(|d| d.name.clone()).collect();

        let mut prev = ResultMap::new();
        for domain in &targets {
            match self.previous_subdomains(domain).await {
                Ok(subs) => {
                    prev.insert(domain.name.clone(), subs);
                }
                Err(e) => {
                    warn!(domain = %domain.name, error = %e, "error getting previous subdomains");
                }
            }
        }

        info!("running passive scans");
        let runner = PassiveRunner::new(self.resolver.clone(), self.config.asm.fanout_width);
        let output = runner.run_passive_enum(&seeds, &prev).await;
        if let Some(err) = &output.error {
            error!(error = %err, "passive scan failed");
        }

        let default_enabled = match self.settings.get().await {
            Ok(settings) => settings.settings.scan_newly_found_hostname,
            Err(e) => {
                warn!(error = %e, "error fetching scan settings, newly found hostnames default to enabled");
                true
            }
        };

        info!("updating results in database");
        for domain in &targets {
            let names = output
                .hostnames
                .get(&domain.name)
                .cloned()
                .unwrap_or_default();
            if let Err(e) = self
                .hostnames
                .insert_batch(domain.id, default_enabled, &names)
                .await
            {
                warn!(domain = %domain.name, error = %e, "error inserting hostname batch");
            }
        }
        info!("passive scan has concluded");
    }

    /// Re-resolve the known hostnames and flip `live` off for the dead
    /// ones. A domain whose resolver run failed is rolled back whole:
    /// every hostname under it is marked dead.
    pub async fn check_live(&self, targets: Vec<Domain>) {
        let threads = self.config.asm.active_threads;

        let mut prev = ResultMap::new();
        for domain in &targets {
            match self.previous_subdomains(domain).await {
                Ok(subs) => {
                    prev.insert(domain.name.clone(), subs);
                }
                Err(e) => {
                    warn!(domain = %domain.name, error = %e, "check live aborted - error getting previous subdomains");
                    return;
                }
            }
        }

        info!("running check live scans");
        let runner = ActiveRunner::new(
            self.resolver.clone(),
            &self.tmp_dir,
            self.config.asm.fanout_width,
        );
        let live = runner.check_live_subdomains(&prev, threads).await;

        for domain in &targets {
            match live.get(&domain.name) {
                None => match self.hostnames.update_live_by_domain(domain.id, false).await {
                    Ok(_) => {
                        info!(domain = %domain.name, "marked all hostnames under domain as dead")
                    }
                    Err(e) => {
                        warn!(domain = %domain.name, error = %e, "error updating dead hostnames under domain")
                    }
                },
                Some(alive) => {
                    let known = prev.get(&domain.name).cloned().unwrap_or_default();
                    for name in difference(&known, alive) {
                        match self.hostnames.update_live_by_name(&name, false).await {
                            Ok(_) => info!(hostname = %name, "marked hostname as dead"),
                            Err(e) => {
                                warn!(hostname = %name, error = %e, "error updating dead hostname")
                            }
                        }
                    }
                }
            }
        }
        info!("check live scan has concluded");
    }

    async fn previous_subdomains(&self, domain: &Domain) -> Result<Vec<String>, DbError> {
        let hostnames = self.hostnames.get_all_by_domain(domain.id).await?;
        Ok(hostnames.into_iter().map(|h| h.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_mapping() {
        let mut session = ScanSession::default();
        assert_eq!(session.terminal(), TerminalStatus::Incomplete);

        session.completed = true;
        assert_eq!(session.terminal(), TerminalStatus::Complete);

        // failed wins over completed: the scan ran through but a phase
        // reported errors
        session.failed = true;
        assert_eq!(session.terminal(), TerminalStatus::Warning);

        session.completed = false;
        assert_eq!(session.terminal(), TerminalStatus::Warning);
    }
}
