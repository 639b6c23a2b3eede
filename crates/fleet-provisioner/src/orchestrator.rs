//! Phase orchestrator.
//!
//! Sequences the Networks, Devices, Settings and Teardown phases across all
//! sites. Every phase checks its ledger preconditions first and records its
//! postconditions in the ledger before the next site or phase advances.
//!
//! | Phase    | Batches                                   | On batch failure        |
//! |----------|-------------------------------------------|-------------------------|
//! | Networks | synchronous, all sites                    | abort phase             |
//! | Devices  | asynchronous + poll, all sites            | abort phase             |
//! | Settings | synchronous, one site at a time           | record site, continue   |
//! | Teardown | direct network deletes                    | abort, ledger keeps rest|
//!
//! Settings work can be spread over several workers. Workers report through
//! a channel; only the orchestrator writes the ledger.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_dashboard::{
    split_actions, Action, BatchPoller, BlinkRequest, CancellationToken, DashboardApi,
    DashboardError, NewActionBatch, NewNetwork, Network, PollConfig, Ticker, TokioTicker,
    MAX_ACTIONS_PER_BATCH,
};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::builders::{ActionBuilders, BuildContext, SettingsMode, StandardBuilders};
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::inventory::Site;
use crate::ledger::{DeviceEntry, Ledger, ProvisioningRecord};
use crate::payload::to_actions;
use crate::phase::{Phase, PhaseReport, SiteFailure};

/// Scheduling and batching parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Per-batch action cap
    pub max_actions_per_batch: usize,
    /// Poller parameters for asynchronous batches
    pub poll: PollConfig,
    /// Minimum wait between Settings submissions
    pub inter_batch_delay: Duration,
    /// Concurrent Settings workers
    pub workers: usize,
    /// Network the site networks are copied from
    pub template_network_name: String,
    /// Directory receiving every submitted batch body
    pub payload_dump_dir: Option<PathBuf>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_actions_per_batch: MAX_ACTIONS_PER_BATCH,
            poll: PollConfig::default(),
            inter_batch_delay: Duration::from_secs(10),
            workers: 1,
            template_network_name: "ISP".to_string(),
            payload_dump_dir: None,
        }
    }
}

impl OrchestratorOptions {
    /// Derives options from validated configuration.
    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self {
            max_actions_per_batch: config.batching.max_actions_per_batch,
            poll: config.poll_config(),
            inter_batch_delay: config.inter_batch_delay(),
            workers: config.settings.workers.max(1),
            template_network_name: config.provisioning.template_network_name.clone(),
            payload_dump_dir: config.provisioning.payload_dump_dir.clone(),
        }
    }
}

/// Drives the provisioning phases against one organization.
pub struct Orchestrator {
    api: Arc<dyn DashboardApi>,
    ticker: Arc<dyn Ticker>,
    builders: Arc<dyn ActionBuilders>,
    context: Arc<BuildContext>,
    options: OrchestratorOptions,
    sites: Vec<Site>,
    ledger: Ledger,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator with the standard builders and a tokio ticker.
    pub fn new(
        api: Arc<dyn DashboardApi>,
        context: BuildContext,
        sites: Vec<Site>,
        ledger: Ledger,
    ) -> Self {
        Self {
            api,
            ticker: Arc::new(TokioTicker),
            builders: Arc::new(StandardBuilders),
            context: Arc::new(context),
            options: OrchestratorOptions::default(),
            sites,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the scheduling options.
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the ticker used for polling and throttling.
    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Replaces the action builders.
    pub fn with_builders(mut self, builders: Arc<dyn ActionBuilders>) -> Self {
        self.builders = builders;
        self
    }

    /// Uses `cancel` to interrupt polling and Settings dispatch.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The ledger as last persisted.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Consumes the orchestrator, returning its ledger.
    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn site(&self, site_number: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.site_number == site_number)
    }

    fn submitter(&self, cancel: CancellationToken) -> BatchSubmitter {
        BatchSubmitter {
            api: Arc::clone(&self.api),
            ticker: Arc::clone(&self.ticker),
            poll: self.options.poll.clone(),
            cap: self.options.max_actions_per_batch,
            dump_dir: self.options.payload_dump_dir.clone(),
            organization_id: self.context.organization_id.clone(),
            cancel,
        }
    }

    /// Runs every phase whose precondition is not yet satisfied, then
    /// Settings for sites that still need it.
    pub async fn run_all(&mut self) -> ProvisionResult<Vec<PhaseReport>> {
        let mut reports = Vec::new();

        if self.ledger.is_empty() {
            reports.push(self.run_networks().await?);
        } else {
            info!(sites = self.ledger.len(), "Networks already recorded");
        }

        if self.ledger.records().iter().any(|r| !r.has_devices()) {
            reports.push(self.run_devices().await?);
        }

        if !self.ledger.is_empty() {
            reports.push(self.run_settings(SettingsMode::Initial).await?);
        }

        Ok(reports)
    }

    /// Creates one network per inventory site and records the network ids.
    #[instrument(skip(self))]
    pub async fn run_networks(&mut self) -> ProvisionResult<PhaseReport> {
        let phase = Phase::Networks;
        let mut report = PhaseReport::new(phase);

        if !self.ledger.is_empty() {
            return Err(ProvisionError::precondition(
                phase,
                format!(
                    "{} already records {} site(s)",
                    self.ledger.path().display(),
                    self.ledger.len()
                ),
            ));
        }
        if self.sites.is_empty() {
            info!("Inventory is empty, no networks to create");
            return Ok(report);
        }

        let org = self.context.organization_id.clone();
        let networks = self.api.list_networks(&org).await?;
        let template_id = self.ensure_template(&networks).await?;

        let existing: HashSet<&str> = networks.iter().map(|n| n.name.as_str()).collect();
        let mut pending: Vec<&Site> = Vec::new();
        for site in &self.sites {
            if existing.contains(site.network_name().as_str()) {
                debug!(site = %site.site_number, "Network already exists");
                report
                    .skipped
                    .push((site.site_number.clone(), "network already exists".to_string()));
            } else {
                pending.push(site);
            }
        }
        let created: HashSet<String> = pending.iter().map(|s| s.site_number.clone()).collect();

        if !pending.is_empty() {
            let specs = self
                .builders
                .network_actions(&self.context, &pending, &template_id)?;
            let actions = to_actions(&specs)?;
            info!(networks = actions.len(), "Creating site networks");
            self.submitter(self.cancel.clone())
                .run("create_networks", actions, true, &mut report.batches)
                .await
                .map_err(|e| abort_phase(phase, e))?;
        }

        // Ids are assigned remotely; look them up by name.
        let networks = self.api.list_networks(&org).await?;
        let ids: HashMap<&str, &str> = networks
            .iter()
            .map(|n| (n.name.as_str(), n.id.as_str()))
            .collect();

        let mut records = Vec::with_capacity(self.sites.len());
        for site in &self.sites {
            let name = site.network_name();
            let id = ids
                .get(name.as_str())
                .ok_or_else(|| ProvisionError::NetworkMissing {
                    site: site.site_number.clone(),
                    name: name.clone(),
                })?;
            records.push(ProvisioningRecord::for_network(site, *id));
            if created.contains(&site.site_number) {
                report.succeeded.push(site.site_number.clone());
            }
        }

        self.ledger.replace_all(records)?;
        info!(%report, "Networks phase finished");
        Ok(report)
    }

    /// Looks up the template network, creating it with VLANs enabled if absent.
    async fn ensure_template(&self, networks: &[Network]) -> ProvisionResult<String> {
        let name = &self.options.template_network_name;
        if let Some(template) = networks.iter().find(|n| &n.name == name) {
            debug!(network_id = %template.id, "Using existing template network");
            return Ok(template.id.clone());
        }

        let template = self
            .api
            .create_network(
                &self.context.organization_id,
                &NewNetwork {
                    name: name.clone(),
                    network_type: self.context.network_type.clone(),
                    tags: String::new(),
                    time_zone: self.context.time_zone.clone(),
                    copy_from_network_id: None,
                },
            )
            .await?;
        self.api.set_vlans_enabled(&template.id, true).await?;
        info!(network_id = %template.id, name = %name, "Created template network with VLANs enabled");
        Ok(template.id)
    }

    /// Claims every site's devices and records them.
    #[instrument(skip(self))]
    pub async fn run_devices(&mut self) -> ProvisionResult<PhaseReport> {
        let phase = Phase::Devices;
        let mut report = PhaseReport::new(phase);

        if self.ledger.is_empty() {
            return Err(ProvisionError::precondition(
                phase,
                "no networks recorded; run the Networks phase first",
            ));
        }

        let mut targets: Vec<(usize, Site)> = Vec::new();
        let mut specs = Vec::new();
        for (index, record) in self.ledger.records().iter().enumerate() {
            let network_id = record.network_id.as_deref().ok_or_else(|| {
                ProvisionError::precondition(
                    phase,
                    format!("site {} has no network recorded", record.site_number),
                )
            })?;
            if record.has_devices() {
                report
                    .skipped
                    .push((record.site_number.clone(), "devices already recorded".to_string()));
                continue;
            }
            let site = self.site(&record.site_number).ok_or_else(|| {
                ProvisionError::precondition(
                    phase,
                    format!("site {} is not in the inventory", record.site_number),
                )
            })?;
            specs.extend(self.builders.claim_actions(&self.context, site, network_id)?);
            targets.push((index, site.clone()));
        }

        if targets.is_empty() {
            info!("All devices already recorded");
            return Ok(report);
        }

        let actions = to_actions(&specs)?;
        if !actions.is_empty() {
            info!(devices = actions.len(), sites = targets.len(), "Claiming devices");
            self.submitter(self.cancel.clone())
                .run("create_devices", actions, false, &mut report.batches)
                .await
                .map_err(|e| abort_phase(phase, e))?;
        }

        for (index, site) in targets {
            let devices: Vec<DeviceEntry> = site
                .devices()
                .into_iter()
                .map(|(serial, role)| DeviceEntry { serial, role })
                .collect();
            let management_vlan = site.management_vlan;
            self.ledger.update_site(index, |r| {
                r.devices = Some(devices);
                r.management_vlan = Some(management_vlan);
            })?;
            report.succeeded.push(site.site_number);
        }

        info!(%report, "Devices phase finished");
        Ok(report)
    }

    /// Configures each eligible site with its own batch.
    ///
    /// A failed site is recorded with its full error list and left eligible
    /// for the next run; the remaining sites still run.
    #[instrument(skip(self))]
    pub async fn run_settings(&mut self, mode: SettingsMode) -> ProvisionResult<PhaseReport> {
        let phase = Phase::Settings;
        let mut report = PhaseReport::new(phase);

        if self.ledger.is_empty() {
            return Err(ProvisionError::precondition(
                phase,
                "no networks recorded; run the Networks phase first",
            ));
        }

        let mut jobs = Vec::new();
        for (index, record) in self.ledger.records().iter().enumerate() {
            let site_number = record.site_number.clone();
            if !record.has_devices() {
                report
                    .skipped
                    .push((site_number, "devices not claimed yet".to_string()));
                continue;
            }
            match (mode, record.settings_created) {
                (SettingsMode::Initial, true) => {
                    report
                        .skipped
                        .push((site_number, "settings already created".to_string()));
                    continue;
                }
                (SettingsMode::Resync, false) => {
                    report
                        .skipped
                        .push((site_number, "settings not created yet".to_string()));
                    continue;
                }
                _ => {}
            }
            match self.site(&site_number) {
                Some(site) => jobs.push(SettingsJob {
                    index,
                    site: site.clone(),
                    record: record.clone(),
                }),
                None => report
                    .skipped
                    .push((site_number, "not in the inventory".to_string())),
            }
        }

        if jobs.is_empty() {
            info!(%report, "No sites need settings");
            return Ok(report);
        }

        let phase_cancel = self.cancel.child_token();
        let worker = SettingsWorker {
            submitter: self.submitter(phase_cancel.clone()),
            builders: Arc::clone(&self.builders),
            context: Arc::clone(&self.context),
            mode,
        };
        let (tx, mut rx) = mpsc::channel(jobs.len());
        let dispatcher = tokio::spawn(dispatch_settings(
            worker,
            jobs,
            Arc::clone(&self.ticker),
            self.options.workers.max(1),
            self.options.inter_batch_delay,
            phase_cancel.clone(),
            tx,
        ));

        let mut fatal = None;
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = self.record_settings_outcome(outcome, &mut report) {
                if fatal.is_none() {
                    error!(error = %e, "Stopping Settings phase");
                    phase_cancel.cancel();
                    fatal = Some(e);
                }
            }
        }

        match dispatcher.await {
            Ok(undispatched) => {
                for site in undispatched {
                    report.skipped.push((site, "cancelled".to_string()));
                }
            }
            Err(e) => error!(error = %e, "Settings dispatcher stopped"),
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        info!(%report, "Settings phase finished");
        Ok(report)
    }

    /// Applies one worker result to the ledger.
    fn record_settings_outcome(
        &mut self,
        outcome: SiteOutcome,
        report: &mut PhaseReport,
    ) -> ProvisionResult<()> {
        report.batches.extend(outcome.batch_ids);

        match outcome.result {
            Ok(()) => {
                self.ledger.update_site(outcome.index, |r| {
                    r.settings_created = true;
                    r.last_errors.clear();
                })?;
                info!(site = %outcome.site, "Site settings applied");
                report.succeeded.push(outcome.site);
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                report.skipped.push((outcome.site, "cancelled".to_string()));
                Ok(())
            }
            Err(e) => {
                let errors = e.site_errors();
                warn!(
                    site = %outcome.site,
                    errors = ?errors,
                    "Site settings failed, will retry on next run"
                );
                let stored = errors.clone();
                self.ledger
                    .update_site(outcome.index, |r| r.last_errors = stored)?;
                report.failed.push(SiteFailure {
                    site: outcome.site,
                    errors,
                });
                // Bad credentials fail every site the same way.
                if e.is_configuration() {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Deletes every recorded network, removing each record as it goes.
    #[instrument(skip(self))]
    pub async fn run_teardown(&mut self) -> ProvisionResult<PhaseReport> {
        let mut report = PhaseReport::new(Phase::Teardown);

        while let Some(record) = self.ledger.get(0).cloned() {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            if let Some(network_id) = &record.network_id {
                match self.api.delete_network(network_id).await {
                    Ok(()) => {
                        info!(site = %record.site_number, network_id = %network_id, "Deleted network")
                    }
                    Err(DashboardError::NotFound { .. }) => {
                        info!(site = %record.site_number, network_id = %network_id, "Network already deleted")
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            self.ledger.remove_site(0)?;
            report.succeeded.push(record.site_number);
        }

        self.ledger.remove_file()?;
        info!(%report, "Teardown finished");
        Ok(report)
    }

    /// Blinks the LEDs of every recorded device at one site.
    pub async fn blink(
        &self,
        site_number: &str,
        request: &BlinkRequest,
    ) -> ProvisionResult<Vec<String>> {
        let record = self
            .ledger
            .find(site_number)
            .ok_or_else(|| ProvisionError::invalid_site(site_number, "not in the ledger"))?;
        let network_id = record
            .network_id
            .as_deref()
            .ok_or_else(|| ProvisionError::invalid_site(site_number, "no network recorded"))?;
        let devices = record
            .devices
            .as_ref()
            .ok_or_else(|| ProvisionError::invalid_site(site_number, "devices not claimed yet"))?;

        let mut blinked = Vec::with_capacity(devices.len());
        for device in devices {
            self.api
                .blink_device(network_id, &device.serial, request)
                .await?;
            debug!(serial = %device.serial, role = %device.role, "Blinking device");
            blinked.push(device.serial.clone());
        }
        Ok(blinked)
    }
}

/// Converts a remote batch failure into a phase-wide failure.
fn abort_phase(phase: Phase, err: ProvisionError) -> ProvisionError {
    match err {
        ProvisionError::Dashboard(DashboardError::BatchFailed { batch_id, errors }) => {
            ProvisionError::PhaseFailed {
                phase,
                batch_id,
                errors,
            }
        }
        other => other,
    }
}

/// Submits action lists as confirmed batches and waits for each to finish.
#[derive(Clone)]
struct BatchSubmitter {
    api: Arc<dyn DashboardApi>,
    ticker: Arc<dyn Ticker>,
    poll: PollConfig,
    cap: usize,
    dump_dir: Option<PathBuf>,
    organization_id: String,
    cancel: CancellationToken,
}

impl BatchSubmitter {
    /// Splits `actions` under the cap and submits the chunks in order,
    /// stopping at the first one that does not complete.
    async fn run(
        &self,
        label: &str,
        actions: Vec<Action>,
        synchronous: bool,
        batch_ids: &mut Vec<String>,
    ) -> ProvisionResult<()> {
        let poller = BatchPoller::new(&*self.api, &*self.ticker, self.poll.clone());

        for (n, chunk) in split_actions(actions, self.cap)?.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            let request = if synchronous {
                NewActionBatch::synchronous(chunk)
            } else {
                NewActionBatch::asynchronous(chunk)
            };
            self.dump(&format!("{}_{}.json", label, n), &request)?;

            let submitted = self
                .api
                .submit_batch(&self.organization_id, &request)
                .await?;
            info!(
                batch_id = %submitted.id,
                actions = request.len(),
                synchronous,
                "Submitted action batch"
            );
            batch_ids.push(submitted.id.clone());

            poller
                .resolve(&self.organization_id, submitted, &self.cancel)
                .await?
                .into_result()?;
        }
        Ok(())
    }

    fn dump(&self, file_name: &str, request: &NewActionBatch) -> ProvisionResult<()> {
        let Some(dir) = &self.dump_dir else {
            return Ok(());
        };
        let dump_err =
            |e: String| ProvisionError::config("provisioning.payload_dump_dir", e);

        fs::create_dir_all(dir).map_err(|e| dump_err(e.to_string()))?;
        let body = serde_json::to_vec_pretty(request).map_err(|e| dump_err(e.to_string()))?;
        let path = dir.join(file_name);
        fs::write(&path, body).map_err(|e| dump_err(e.to_string()))?;
        debug!(path = %path.display(), "Wrote batch payload");
        Ok(())
    }
}

/// One site's Settings work.
struct SettingsJob {
    index: usize,
    site: Site,
    record: ProvisioningRecord,
}

/// Result reported back to the ledger writer.
struct SiteOutcome {
    index: usize,
    site: String,
    batch_ids: Vec<String>,
    result: ProvisionResult<()>,
}

/// Everything a Settings worker needs, shareable across tasks.
#[derive(Clone)]
struct SettingsWorker {
    submitter: BatchSubmitter,
    builders: Arc<dyn ActionBuilders>,
    context: Arc<BuildContext>,
    mode: SettingsMode,
}

impl SettingsWorker {
    async fn apply(&self, job: SettingsJob) -> SiteOutcome {
        let mut batch_ids = Vec::new();
        let result = self.build_and_submit(&job, &mut batch_ids).await;
        SiteOutcome {
            index: job.index,
            site: job.site.site_number,
            batch_ids,
            result,
        }
    }

    async fn build_and_submit(
        &self,
        job: &SettingsJob,
        batch_ids: &mut Vec<String>,
    ) -> ProvisionResult<()> {
        let specs =
            self.builders
                .settings_actions(&self.context, &job.site, &job.record, self.mode)?;
        let actions = to_actions(&specs)?;
        info!(site = %job.site.site_number, actions = actions.len(), "Configuring site");
        self.submitter
            .run(
                &format!("create_settings_{}", job.site.site_number),
                actions,
                true,
                batch_ids,
            )
            .await
    }
}

/// Hands jobs to at most `workers` concurrent tasks, waiting `delay` between
/// submissions. Returns the sites never dispatched because of cancellation.
async fn dispatch_settings(
    worker: SettingsWorker,
    jobs: Vec<SettingsJob>,
    ticker: Arc<dyn Ticker>,
    workers: usize,
    delay: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<SiteOutcome>,
) -> Vec<String> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut undispatched = Vec::new();
    let mut stopped = false;

    for (position, job) in jobs.into_iter().enumerate() {
        if stopped {
            undispatched.push(job.site.site_number);
            continue;
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            stopped = true;
            undispatched.push(job.site.site_number);
            continue;
        };

        if position > 0 {
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = ticker.tick(delay) => false,
            };
            if cancelled {
                stopped = true;
                undispatched.push(job.site.site_number);
                continue;
            }
        }

        let worker = worker.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = worker.apply(job).await;
            // The receiver is gone only if the phase already stopped.
            let _ = tx.send(outcome).await;
            drop(permit);
        });
    }

    undispatched
}
