//! `probely` probes web applications for SQL injection. It crawls the
//! same-origin page graph politely (honoring `robots.txt` and a
//! per-request delay), turns query strings and forms into injectable
//! targets, and runs error-based, boolean-blind, time-based, and
//! UNION-based detection against every parameter. Accepted findings are
//! deduplicated, risk-scored, and enriched with a DBMS guess and
//! remediation guidance.

pub mod client;
pub mod crawler;
pub mod diff;
mod engine;
pub mod export;
pub mod findings;
pub mod payloads;
pub mod robots;
pub mod session;
pub mod targets;

use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use indexmap::IndexSet;
use reqwest::Url;
use tokio::sync::Mutex;

use crate::client::HttpClient;
use crate::crawler::Crawler;
use crate::engine::ProbeEngine;
use crate::findings::FindingStore;
use crate::robots::RobotsPolicy;

pub use crate::client::{FetchResponse, USER_AGENT_POOL};
pub use crate::crawler::{CrawlOutcome, DiscoveredForm};
pub use crate::export::ExportPaths;
pub use crate::findings::{Finding, Risk, Technique};
pub use crate::session::{
    ResultsSnapshot, ScanEvent, ScanSession, ScanState, StartScanError,
};
pub use crate::targets::{Method, Target};

// Default configuration constants.
const MAX_DEPTH: usize = 2;
const CONCURRENCY: usize = 5;
const DELAY_SECONDS: f64 = 0.3;
const TIMEOUT_SECONDS: f64 = 10.0;
const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_SECONDS: f64 = 0.4;
const BOOLEAN_ROUNDS: usize = 3;
const UNION_MAX_COLUMNS: usize = 6;
const TIME_THRESHOLD_SECONDS: f64 = 2.0;

/// Configuration parameters for the `Scanner`.
/// Defines bounds and behaviors for crawling and probing.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Inclusive BFS depth cap measured from the seed page.
    pub max_depth: usize,
    /// Global cap on simultaneous in-flight HTTP requests.
    pub concurrency: usize,
    /// Politeness sleep in seconds after each crawler fetch.
    pub delay: f64,
    /// Per-request wall-clock timeout in seconds.
    pub timeout: f64,
    /// Retries on transport failure, 429, and 5xx.
    pub max_retries: u32,
    /// First backoff delay in seconds; doubles per retry.
    pub backoff_base: f64,
    /// Consult `robots.txt` before fetching.
    pub respect_robots: bool,
    /// Session user agent, sent on every request and used for robots
    /// matching.
    pub user_agent: String,
    /// True/false rounds per boolean context (minimum 1).
    pub boolean_rounds: usize,
    /// Highest column count tried during UNION detection.
    pub union_max_columns: usize,
    /// Collapse findings that differ only by payload.
    pub noise_grouping: bool,
    /// Enable the time-based phase.
    pub time_based: bool,
    /// Seconds of injected delay considered significant.
    pub time_threshold: f64,
    /// Probe each parameter with boundary seed values, not just the
    /// original.
    pub param_fuzz: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            concurrency: CONCURRENCY,
            delay: DELAY_SECONDS,
            timeout: TIMEOUT_SECONDS,
            max_retries: MAX_RETRIES,
            backoff_base: BACKOFF_BASE_SECONDS,
            respect_robots: true,
            user_agent: USER_AGENT_POOL[0].to_string(),
            boolean_rounds: BOOLEAN_ROUNDS,
            union_max_columns: UNION_MAX_COLUMNS,
            noise_grouping: true,
            time_based: false,
            time_threshold: TIME_THRESHOLD_SECONDS,
            param_fuzz: false,
            verbose: true,
            quiet: false,
        }
    }
}

impl ScanConfig {
    /// Progress chatter is printed when verbose and not silenced.
    pub(crate) fn chatty(&self) -> bool {
        self.verbose && !self.quiet
    }
}

/// Builder pattern for `Scanner`. Allows for customizable configurations.
pub struct ScannerBuilder {
    config: ScanConfig,
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerBuilder {
    /// Initializes a new builder with default configuration.
    pub fn new() -> Self {
        ScannerBuilder {
            config: ScanConfig::default(),
        }
    }

    /// Set the inclusive BFS depth cap.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the global limit for concurrent requests.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the politeness delay in seconds after each crawler fetch.
    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.config.delay = seconds;
        self
    }

    /// Set the per-request timeout in seconds.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.config.timeout = seconds;
        self
    }

    /// Set how many times a failed request is retried.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the base backoff delay in seconds.
    pub fn with_backoff_base(mut self, seconds: f64) -> Self {
        self.config.backoff_base = seconds;
        self
    }

    /// Enable or disable `robots.txt` handling.
    pub fn with_robots(mut self, respect: bool) -> Self {
        self.config.respect_robots = respect;
        self
    }

    /// Set a custom user agent.
    pub fn with_user_agent<S: AsRef<str>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.as_ref().into();
        self
    }

    /// Set the number of boolean rounds (clamped to at least 1).
    pub fn with_boolean_rounds(mut self, rounds: usize) -> Self {
        self.config.boolean_rounds = rounds.max(1);
        self
    }

    /// Set the highest column count tried during UNION detection.
    pub fn with_union_max_columns(mut self, columns: usize) -> Self {
        self.config.union_max_columns = columns;
        self
    }

    /// Group findings that differ only by payload.
    pub fn with_noise_grouping(mut self, enabled: bool) -> Self {
        self.config.noise_grouping = enabled;
        self
    }

    /// Enable the time-based detection phase.
    pub fn with_time_based(mut self, enabled: bool) -> Self {
        self.config.time_based = enabled;
        self
    }

    /// Set the delay threshold in seconds for time-based detection.
    pub fn with_time_threshold(mut self, seconds: f64) -> Self {
        self.config.time_threshold = seconds;
        self
    }

    /// Probe parameters with boundary seed values in addition to their
    /// original values.
    pub fn with_param_fuzz(mut self, enabled: bool) -> Self {
        self.config.param_fuzz = enabled;
        self
    }

    /// Print progress chatter.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Silence finding announcements and progress chatter.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    /// Consumes the builder and returns a configured `Scanner` instance.
    pub fn build(self) -> Result<Scanner> {
        Scanner::from_config(self.config)
    }

    /// Returns the accumulated configuration without building a scanner,
    /// for handing to a [`ScanSession`].
    pub fn into_config(self) -> ScanConfig {
        self.config
    }
}

/// Crawl-phase output: the visited set and the deduplicated target list.
#[derive(Debug)]
pub struct CrawlReport {
    pub visited: IndexSet<String>,
    pub targets: Vec<Target>,
}

/// Main structure for the scanner, holding the shared HTTP client and the
/// scan configuration.
pub struct Scanner {
    config: ScanConfig,
    client: HttpClient,
}

impl Scanner {
    /// Initializes the scanner with a given configuration.
    pub(crate) fn from_config(config: ScanConfig) -> Result<Self> {
        let client = HttpClient::new(
            &config.user_agent,
            Duration::from_secs_f64(config.timeout),
            config.concurrency,
            config.max_retries,
            config.backoff_base,
        )?;
        Ok(Self { config, client })
    }

    /// Initializes a new `Scanner` instance with the default configuration.
    pub fn new() -> Result<Self> {
        Self::from_config(ScanConfig::default())
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Crawls the same-origin graph from `start_url` and derives the
    /// injectable target list.
    #[tracing::instrument(skip(self))]
    pub async fn crawl(&self, start_url: &str) -> Result<CrawlReport> {
        let seed = Url::parse(start_url)?;
        seed.host_str()
            .ok_or_else(|| anyhow::anyhow!("Host not found."))?;

        let robots = if self.config.respect_robots {
            RobotsPolicy::load(&self.client, &seed, &self.config.user_agent).await
        } else {
            RobotsPolicy::allow_all(&self.config.user_agent)
        };

        let crawler = Crawler {
            client: &self.client,
            robots: &robots,
            max_depth: self.config.max_depth,
            delay: self.config.delay,
            chatty: self.config.chatty(),
        };
        let outcome = crawler.crawl(&seed).await;
        let targets = targets::collect_targets(&outcome.visited, &outcome.forms);
        if self.config.chatty() {
            tracing::info!(
                "Discovered {} targets across {} pages.",
                targets.len(),
                outcome.visited.len()
            );
        }
        Ok(CrawlReport {
            visited: outcome.visited,
            targets,
        })
    }

    /// Probes every target with the detection phases. Targets fan out as
    /// independent futures; the client's semaphore is the only concurrency
    /// bound, and within a target all requests stay sequential.
    #[tracing::instrument(skip(self, targets))]
    pub async fn probe(&self, targets: &[Target]) -> Vec<Finding> {
        let store = Mutex::new(FindingStore::new(self.config.noise_grouping));
        let engine = ProbeEngine::new(&self.client, &self.config, &store);
        join_all(targets.iter().map(|target| engine.probe(target))).await;
        store.into_inner().into_findings()
    }

    /// Runs a full scan: crawl, then probe every discovered target.
    ///
    /// Returns the deduplicated, risk-scored findings in discovery order.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, start_url: &str) -> Result<Vec<Finding>> {
        let report = self.crawl(start_url).await?;
        Ok(self.probe(&report.targets).await)
    }
}
