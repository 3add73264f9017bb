//! Discovery pipeline.
//!
//! Stages run strictly in sequence:
//! - range expansion (CIDR to candidate addresses)
//! - reachability sweep (system ping)
//! - service sweep (TCP connect, SSH by default)
//! - classification and inventory build
//!
//! Each probing phase has its own [`WorkerPool`]. Probe failures are never
//! errors; they only decide which addresses move on to the next stage.

mod ping;
mod pool;
pub mod range;
mod service;

pub use ping::PingProbe;
pub use pool::WorkerPool;
pub use range::{expand_range, NetworkRange};
pub use service::{TcpServiceProbe, DEFAULT_SERVICE_PORT};

use crate::classify::{Classifier, OctetRangeClassifier};
use crate::config::SurveyConfig;
use crate::error::Result;
use crate::inventory::{InventoryBuilder, InventoryTree};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that does not flash a console window on Windows.
#[cfg(target_os = "windows")]
pub(crate) fn hidden_command_sync(program: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn hidden_command_sync(program: &str) -> Command {
    Command::new(program)
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Which probing phase produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePhase {
    Reachability,
    Service,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePhase::Reachability => write!(f, "reachability"),
            ProbePhase::Service => write!(f, "service"),
        }
    }
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ProbeOutcome {
    Responded,
    Timeout,
    Refused,
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_responded(&self) -> bool {
        matches!(self, ProbeOutcome::Responded)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Responded => write!(f, "responded"),
            ProbeOutcome::Timeout => write!(f, "timed out"),
            ProbeOutcome::Refused => write!(f, "refused"),
            ProbeOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub address: IpAddr,
    pub phase: ProbePhase,
    pub outcome: ProbeOutcome,
}

/// A single-address check. Implementations must never panic on network
/// errors; every failure maps to a [`ProbeOutcome`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: IpAddr) -> ProbeOutcome;
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress updates during a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryProgress {
    pub stage: DiscoveryStage,
    pub message: String,
    pub percent: Option<u8>,
    pub devices_found: Option<usize>,
    pub elapsed_secs: f64,
}

/// Stages of a discovery run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStage {
    Expanding,
    Reachability,
    Service,
    Classifying,
    Building,
    Complete,
}

/// Callback type for discovery progress updates
pub type ProgressCallback = Box<dyn Fn(DiscoveryProgress) + Send + Sync>;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What happened to one candidate address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Disposition {
    /// No reply to the reachability probe
    NotLive,
    /// Live, but the management port did not accept a connection
    ServiceClosed,
    /// Placed in the named leaf group
    Placed { group: String },
}

/// Outcome of [`Discovery::run`]
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Normalized range that was scanned
    pub range: NetworkRange,
    pub expanded: usize,
    pub live: usize,
    pub service_open: usize,
    pub classified: usize,
    /// Devices that fell through to the unknown group
    pub unknown: usize,
    /// One entry per expanded address, ascending
    pub dispositions: Vec<(IpAddr, Disposition)>,
    pub tree: InventoryTree,
    pub generated_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl DiscoveryReport {
    /// No address made it into the inventory
    pub fn is_empty(&self) -> bool {
        self.classified == 0
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Runs the full pipeline with one explicit configuration.
pub struct Discovery {
    config: SurveyConfig,
    reachability: Arc<dyn Probe>,
    service: Arc<dyn Probe>,
    classifier: Arc<dyn Classifier>,
}

impl Discovery {
    /// Pipeline with the system ping, a TCP connect probe and the octet-range
    /// classifier, all configured from `config`.
    pub fn new(config: SurveyConfig) -> Self {
        let reachability = Arc::new(PingProbe::new(config.reachability.timeout()));
        let service = Arc::new(TcpServiceProbe::new(
            config.service.port,
            config.service.timeout(),
        ));
        let classifier = Arc::new(OctetRangeClassifier::new(&config.inventory.secret_store));
        Self {
            config,
            reachability,
            service,
            classifier,
        }
    }

    pub fn with_reachability_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.reachability = probe;
        self
    }

    pub fn with_service_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.service = probe;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Discover devices in `range` and build their inventory.
    pub async fn run(&self, range: &str) -> Result<DiscoveryReport> {
        self.run_with_progress(range, None).await
    }

    /// Discover devices in `range`, reporting progress along the way.
    pub async fn run_with_progress(
        &self,
        range: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DiscoveryReport> {
        let start = Instant::now();

        let emit_progress =
            |stage: DiscoveryStage, message: &str, percent: Option<u8>, devices: Option<usize>| {
                let progress = DiscoveryProgress {
                    stage,
                    message: message.to_string(),
                    percent,
                    devices_found: devices,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                };
                tracing::debug!("[Discovery] {}", message);
                if let Some(ref callback) = on_progress {
                    callback(progress);
                }
            };

        // Stage 1: expand the range
        emit_progress(
            DiscoveryStage::Expanding,
            &format!("Expanding {}...", range),
            Some(0),
            None,
        );
        let network = NetworkRange::parse(range)?;
        let candidates = expand_range(range, self.config.max_hosts)?;
        tracing::info!("Scanning {} ({} candidate addresses)", network, candidates.len());

        // Stage 2: reachability
        let live = self
            .sweep(
                ProbePhase::Reachability,
                self.config.reachability.workers,
                &self.reachability,
                &candidates,
                (5, 60),
                &emit_progress,
            )
            .await;
        tracing::info!("{} of {} addresses are live", live.len(), candidates.len());

        // Stage 3: management service
        let live_list: Vec<IpAddr> = live.iter().copied().collect();
        let open = self
            .sweep(
                ProbePhase::Service,
                self.config.service_workers(),
                &self.service,
                &live_list,
                (60, 85),
                &emit_progress,
            )
            .await;
        tracing::info!(
            "{} of {} live addresses accept connections on port {}",
            open.len(),
            live.len(),
            self.config.service.port
        );

        // Stage 4: classify, ascending so output is independent of probe timing
        emit_progress(
            DiscoveryStage::Classifying,
            &format!("Classifying {} devices...", open.len()),
            Some(85),
            Some(open.len()),
        );
        let classified: Vec<_> = open
            .iter()
            .map(|&address| (address, self.classifier.classify(address)))
            .collect();
        let unknown = classified.iter().filter(|(_, c)| c.is_unknown()).count();

        // Stage 5: build
        emit_progress(
            DiscoveryStage::Building,
            "Building inventory...",
            Some(90),
            Some(classified.len()),
        );
        let mut builder =
            InventoryBuilder::new(&self.config.inventory).with_catalog(&self.classifier.catalog());
        for (address, classification) in &classified {
            builder.add_device(*address, classification)?;
        }
        let tree = builder.build()?;

        let dispositions = candidates
            .iter()
            .map(|&address| {
                let disposition = if !live.contains(&address) {
                    Disposition::NotLive
                } else if !open.contains(&address) {
                    Disposition::ServiceClosed
                } else {
                    let group = classified
                        .binary_search_by_key(&address, |(a, _)| *a)
                        .map(|i| classified[i].1.group.name.clone())
                        .unwrap_or_default();
                    Disposition::Placed { group }
                };
                (address, disposition)
            })
            .collect();

        let elapsed_secs = start.elapsed().as_secs_f64();
        emit_progress(
            DiscoveryStage::Complete,
            &format!(
                "Discovery complete: {} devices ({} unclassified) in {:.1}s",
                classified.len(),
                unknown,
                elapsed_secs
            ),
            Some(100),
            Some(classified.len()),
        );

        Ok(DiscoveryReport {
            range: network,
            expanded: candidates.len(),
            live: live.len(),
            service_open: open.len(),
            classified: classified.len(),
            unknown,
            dispositions,
            tree,
            generated_at: Utc::now(),
            elapsed_secs,
        })
    }

    /// Run one probing phase and return the addresses that responded
    async fn sweep(
        &self,
        phase: ProbePhase,
        workers: usize,
        probe: &Arc<dyn Probe>,
        addresses: &[IpAddr],
        (from, to): (u8, u8),
        emit_progress: &impl Fn(DiscoveryStage, &str, Option<u8>, Option<usize>),
    ) -> BTreeSet<IpAddr> {
        let stage = match phase {
            ProbePhase::Reachability => DiscoveryStage::Reachability,
            ProbePhase::Service => DiscoveryStage::Service,
        };
        emit_progress(
            stage,
            &format!("Probing {} addresses ({} phase)...", addresses.len(), phase),
            Some(from),
            None,
        );

        // Report roughly every 5% so large ranges do not flood the callback
        let step = (addresses.len() / 20).max(1);
        let pool = WorkerPool::new(phase, workers);
        let results = pool
            .sweep(Arc::clone(probe), addresses, |done, total| {
                if done % step == 0 || done == total {
                    let span = u64::from(to - from);
                    let percent = from + (span * done as u64 / total.max(1) as u64) as u8;
                    emit_progress(
                        stage,
                        &format!("{} phase: {}/{} probed", phase, done, total),
                        Some(percent),
                        None,
                    );
                }
            })
            .await;

        results
            .into_iter()
            .filter(|r| r.outcome.is_responded())
            .map(|r| r.address)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Responders(BTreeSet<IpAddr>);

    #[async_trait]
    impl Probe for Responders {
        async fn probe(&self, address: IpAddr) -> ProbeOutcome {
            if self.0.contains(&address) {
                ProbeOutcome::Responded
            } else {
                ProbeOutcome::Timeout
            }
        }
    }

    fn responders(list: &[&str]) -> Arc<dyn Probe> {
        Arc::new(Responders(list.iter().map(|a| a.parse().unwrap()).collect()))
    }

    fn discovery(live: &[&str], open: &[&str]) -> Discovery {
        Discovery::new(SurveyConfig::default())
            .with_reachability_probe(responders(live))
            .with_service_probe(responders(open))
    }

    #[tokio::test]
    async fn test_pipeline_places_only_service_responders() {
        let report = discovery(&["10.1.1.5", "10.1.1.35", "10.1.1.99"], &["10.1.1.5", "10.1.1.35"])
            .run("10.1.1.0/24")
            .await
            .unwrap();

        assert_eq!(report.expanded, 254);
        assert_eq!(report.live, 3);
        assert_eq!(report.service_open, 2);
        assert_eq!(report.classified, 2);
        assert_eq!(report.unknown, 0);
        assert!(!report.is_empty());

        let hostnames: Vec<&str> = report.tree.hosts().into_iter().map(|r| r.hostname()).collect();
        assert_eq!(hostnames, ["device-10-1-1-5", "device-10-1-1-35"]);
    }

    #[tokio::test]
    async fn test_every_address_has_one_disposition() {
        let report = discovery(&["10.1.1.1", "10.1.1.2"], &["10.1.1.2"])
            .run("10.1.1.0/29")
            .await
            .unwrap();

        assert_eq!(report.dispositions.len(), report.expanded);
        let lookup = |a: &str| {
            let a: IpAddr = a.parse().unwrap();
            report
                .dispositions
                .iter()
                .find(|(addr, _)| *addr == a)
                .map(|(_, d)| d.clone())
                .unwrap()
        };
        assert_eq!(lookup("10.1.1.1"), Disposition::ServiceClosed);
        assert_eq!(
            lookup("10.1.1.2"),
            Disposition::Placed {
                group: "cisco_routers".into()
            }
        );
        assert_eq!(lookup("10.1.1.6"), Disposition::NotLive);
    }

    #[tokio::test]
    async fn test_service_only_sees_live_addresses() {
        // A service responder that is not live must not be placed
        let report = discovery(&[], &["10.1.1.5"]).run("10.1.1.0/30").await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.tree.host_count(), 0);
        assert_eq!(report.tree.leaf_groups().len(), 7);
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_probing() {
        let result = discovery(&[], &[]).run("10.1.1.1").await;
        assert!(matches!(
            result,
            Err(crate::error::SurveyError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_stages_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |p: DiscoveryProgress| {
            if let Ok(mut stages) = sink.lock() {
                if stages.last() != Some(&p.stage) {
                    stages.push(p.stage);
                }
            }
        });

        discovery(&["10.1.1.5"], &["10.1.1.5"])
            .run_with_progress("10.1.1.0/28", Some(callback))
            .await
            .unwrap();

        let stages = seen.lock().unwrap().clone();
        assert_eq!(
            stages,
            [
                DiscoveryStage::Expanding,
                DiscoveryStage::Reachability,
                DiscoveryStage::Service,
                DiscoveryStage::Classifying,
                DiscoveryStage::Building,
                DiscoveryStage::Complete,
            ]
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(ProbeOutcome::Timeout.to_string(), "timed out");
        assert_eq!(
            ProbeOutcome::Failed("no route".into()).to_string(),
            "failed (no route)"
        );
        assert!(!ProbeOutcome::Refused.is_responded());
    }
}
