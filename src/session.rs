//! Scan lifecycle control surface for external collaborators (dashboards,
//! exporters, event consumers).
//!
//! One session runs at most one scan at a time. Starting is a
//! compare-and-swap on the state machine
//! (`Idle → Crawling → Probing → Exporting → Idle`); a second start while
//! any phase is active observes [`StartScanError::Busy`]. Every state
//! transition and results refresh emits [`ScanEvent::Update`] on the
//! broadcast channel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::export;
use crate::findings::Finding;
use crate::{ScanConfig, Scanner};

/// Lifecycle of a scan worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Crawling,
    Probing,
    Exporting,
}

impl ScanState {
    pub fn is_running(&self) -> bool {
        !matches!(self, ScanState::Idle)
    }
}

/// Signal that results or the running flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    Update,
}

/// Consistent snapshot served to result consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultsSnapshot {
    pub count: usize,
    pub updated_at: Option<String>,
    pub results: Vec<Finding>,
}

/// Why a scan did not start.
#[derive(Debug, Error)]
pub enum StartScanError {
    #[error("a scan is already running")]
    Busy,
    #[error("invalid seed URL: {0}")]
    InvalidSeed(String),
}

/// At-most-one-scan controller owning the state machine, the results
/// snapshot, and the update event channel.
pub struct ScanSession {
    state: Arc<Mutex<ScanState>>,
    snapshot: Arc<RwLock<ResultsSnapshot>>,
    events: broadcast::Sender<ScanEvent>,
    output_dir: PathBuf,
}

impl ScanSession {
    /// `output_dir` receives the JSON/CSV reports and `latest_scan.json`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(ScanState::Idle)),
            snapshot: Arc::new(RwLock::new(ResultsSnapshot::default())),
            events,
            output_dir: output_dir.into(),
        }
    }

    /// `true` while any scan phase is active.
    pub fn status(&self) -> bool {
        self.state().is_running()
    }

    pub fn state(&self) -> ScanState {
        *lock_state(&self.state)
    }

    /// Subscribes to update events. Lagged receivers miss events, not
    /// state: `results()` always serves the latest snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub async fn results(&self) -> ResultsSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Starts a scan on a background task. Rejects unparseable seeds and
    /// concurrent starts; otherwise returns immediately while the scan
    /// proceeds.
    pub fn start_scan(&self, start_url: &str, config: ScanConfig) -> Result<(), StartScanError> {
        if reqwest::Url::parse(start_url).is_err() {
            return Err(StartScanError::InvalidSeed(start_url.to_string()));
        }
        {
            let mut state = lock_state(&self.state);
            if state.is_running() {
                return Err(StartScanError::Busy);
            }
            *state = ScanState::Crawling;
        }
        let _ = self.events.send(ScanEvent::Update);

        let state = Arc::clone(&self.state);
        let snapshot = Arc::clone(&self.snapshot);
        let events = self.events.clone();
        let output_dir = self.output_dir.clone();
        let start_url = start_url.to_string();

        tokio::spawn(async move {
            let findings = run_phases(&start_url, config, &state, &events, &output_dir).await;
            {
                let mut snap = snapshot.write().await;
                snap.count = findings.len();
                snap.updated_at = Some(Utc::now().to_rfc3339());
                snap.results = findings;
            }
            set_state(&state, ScanState::Idle, &events);
        });

        Ok(())
    }
}

async fn run_phases(
    start_url: &str,
    config: ScanConfig,
    state: &Mutex<ScanState>,
    events: &broadcast::Sender<ScanEvent>,
    output_dir: &Path,
) -> Vec<Finding> {
    let scanner = match Scanner::from_config(config) {
        Ok(scanner) => scanner,
        Err(error) => {
            tracing::error!("Could not build a scanner: {error}.");
            return Vec::new();
        }
    };

    let report = match scanner.crawl(start_url).await {
        Ok(report) => report,
        Err(error) => {
            tracing::error!("Crawl of {start_url} failed: {error}.");
            return Vec::new();
        }
    };

    set_state(state, ScanState::Probing, events);
    let findings = scanner.probe(&report.targets).await;

    set_state(state, ScanState::Exporting, events);
    if let Err(error) = export::write_reports(&findings, output_dir) {
        tracing::error!("Export failed: {error}.");
    }

    findings
}

fn set_state(state: &Mutex<ScanState>, next: ScanState, events: &broadcast::Sender<ScanEvent>) {
    *lock_state(state) = next;
    let _ = events.send(ScanEvent::Update);
}

fn lock_state(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
