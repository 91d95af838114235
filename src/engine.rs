//! Per-target probe engine.
//!
//! Each target runs four phases in order: error-based, boolean-blind,
//! time-based (opt-in), and UNION-based. Within a target all requests are
//! sequential; overlapping them would corrupt the baseline and timing
//! comparisons. The engine works on its own clone of the target's
//! parameter map, so concurrent targets never share mutable state.
//!
//! Network failures surface as empty bodies and cannot become findings:
//! the comparator ignores empty sides and no error pattern matches an
//! empty string.

use std::time::Instant;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use tokio::sync::Mutex;

use crate::client::{FetchResponse, HttpClient};
use crate::diff::{differs, similarity};
use crate::findings::{FindingStore, Technique};
use crate::payloads::{self, mutate};
use crate::targets::Target;
use crate::ScanConfig;

lazy_static! {
    /// DBMS error fragments that betray an injectable query.
    static ref SQL_ERRORS: Vec<Regex> = [
        r"SQLSTATE\[[A-Z0-9]+\]",
        r#"near ".*": syntax error"#,
        r"no such column",
        r"unrecognized token",
        r"unterminated (?:quoted )?string",
        r"SELECTs to the left and right of UNION do not have the same number of result columns",
        r"You have an error in your SQL syntax",
        r"mysql_",
        r"used SELECT statements have a different number of columns",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap()
    })
    .collect();

    static ref COLUMN_MISMATCH: Regex =
        RegexBuilder::new(r"number of result columns|different number of columns")
            .case_insensitive(true)
            .build()
            .unwrap();
}

pub(crate) struct ProbeEngine<'a> {
    client: &'a HttpClient,
    config: &'a ScanConfig,
    store: &'a Mutex<FindingStore>,
}

impl<'a> ProbeEngine<'a> {
    pub fn new(client: &'a HttpClient, config: &'a ScanConfig, store: &'a Mutex<FindingStore>) -> Self {
        Self { client, config, store }
    }

    #[tracing::instrument(skip(self, target), fields(url = %target.url, method = %target.method))]
    pub async fn probe(&self, target: &Target) {
        let mut params = target.params.clone();
        let names: Vec<String> = params.keys().cloned().collect();
        let baseline = self.fetch(target, &params).await;

        self.error_phase(target, &mut params, &names).await;
        self.boolean_phase(target, &mut params, &names).await;
        if self.config.time_based {
            self.time_phase(target, &mut params, &names).await;
        }
        self.union_phase(target, &mut params, &names, &baseline.body).await;
    }

    async fn fetch(&self, target: &Target, params: &IndexMap<String, String>) -> FetchResponse {
        self.client.fetch(&target.url, target.method, Some(params)).await
    }

    async fn record(
        &self,
        target: &Target,
        technique: Technique,
        param: &str,
        payload: &str,
        evidence: String,
        columns: Option<usize>,
    ) {
        let mut store = self.store.lock().await;
        let inserted = store
            .record(&target.url, target.method, param, technique, payload, evidence, columns)
            .is_some();
        if inserted && !self.config.quiet {
            tracing::info!(
                "[!] {technique} on {} param={param} payload={payload}",
                target.url
            );
        }
    }

    /// Seed values injected in front of each payload. With `param_fuzz`
    /// the original value is joined by a fixed set of boundary probes.
    fn seed_values(&self, original: &str) -> Vec<String> {
        if !self.config.param_fuzz {
            return vec![original.to_string()];
        }
        let long_run = "A".repeat(32);
        let candidates = [
            original, "", "0", "1", "-1", "admin", long_run.as_str(), "'\"<>&", "null",
        ];
        let mut seeds: Vec<String> = Vec::new();
        for candidate in candidates {
            if !seeds.iter().any(|seen| seen == candidate) {
                seeds.push(candidate.to_string());
            }
        }
        seeds
    }

    /// Phase A: send break-out payloads and scan responses for DBMS error
    /// fragments. Evidence carries the pattern, HTTP status, and how close
    /// the error sits to the reflected payload.
    async fn error_phase(
        &self,
        target: &Target,
        params: &mut IndexMap<String, String>,
        names: &[String],
    ) {
        for param in names {
            let original = params.get(param).cloned().unwrap_or_default();
            for seed in self.seed_values(&original) {
                for base in payloads::ERROR_PAYLOADS {
                    for variant in mutate(base) {
                        params.insert(param.clone(), format!("{seed}{variant}"));
                        let response = self.fetch(target, params).await;
                        for pattern in SQL_ERRORS.iter() {
                            let Some(matched) = pattern.find(&response.body) else {
                                continue;
                            };
                            let snippet: String = variant.chars().take(10).collect();
                            let proximity = response
                                .body
                                .find(&snippet)
                                .map(|at| (matched.start() as i64 - at as i64).unsigned_abs().to_string())
                                .unwrap_or_else(|| "n/a".to_string());
                            let evidence = format!(
                                "{} | status={} | prox={}",
                                pattern.as_str(),
                                response.status_label(),
                                proximity
                            );
                            self.record(target, Technique::ErrorBased, param, &variant, evidence, None)
                                .await;
                        }
                    }
                }
            }
            params.insert(param.clone(), original);
        }
    }

    /// Phase B: multi-round true/false differential, numeric then string
    /// context. A finding needs a majority of rounds (at least two) to
    /// show a significant response difference.
    async fn boolean_phase(
        &self,
        target: &Target,
        params: &mut IndexMap<String, String>,
        names: &[String],
    ) {
        let rounds = self.config.boolean_rounds;
        let needed = ((rounds + 1) / 2).max(2);
        let contexts = [
            (payloads::BOOLEAN_NUM_TRUE, payloads::BOOLEAN_NUM_FALSE),
            (payloads::BOOLEAN_STR_TRUE, payloads::BOOLEAN_STR_FALSE),
        ];

        for param in names {
            let original = params.get(param).cloned().unwrap_or_default();
            for seed in self.seed_values(&original) {
                for (true_base, false_base) in contexts {
                    let true_payload = first_variant(true_base);
                    let false_payload = first_variant(false_base);
                    let mut diffs = 0usize;
                    let mut ratios = Vec::with_capacity(rounds);

                    for _ in 0..rounds {
                        params.insert(param.clone(), format!("{seed}{true_payload}"));
                        let truthy = self.fetch(target, params).await;
                        params.insert(param.clone(), format!("{seed}{false_payload}"));
                        let falsy = self.fetch(target, params).await;
                        if differs(&truthy.body, &falsy.body) {
                            diffs += 1;
                        }
                        ratios.push(similarity(&truthy.body, &falsy.body));
                    }

                    if diffs >= needed {
                        let sim_avg = ratios.iter().sum::<f64>() / ratios.len() as f64;
                        let payload = format!("{true_payload}/{false_payload}");
                        let evidence = format!("rounds={rounds} diffs={diffs} sim_avg={sim_avg:.3}");
                        self.record(target, Technique::BooleanBlind, param, &payload, evidence, None)
                            .await;
                    }
                }
            }
            params.insert(param.clone(), original);
        }
    }

    /// Phase C (opt-in): inject delay functions and compare elapsed time
    /// against a fresh per-param baseline, tolerating 20% of jitter.
    async fn time_phase(
        &self,
        target: &Target,
        params: &mut IndexMap<String, String>,
        names: &[String],
    ) {
        let threshold = self.config.time_threshold;
        let candidates = payloads::time_payloads(threshold);

        for param in names {
            let original = params.get(param).cloned().unwrap_or_default();
            params.insert(param.clone(), original.clone());
            let started = Instant::now();
            self.fetch(target, params).await;
            let base_latency = started.elapsed().as_secs_f64();

            for payload in &candidates {
                params.insert(param.clone(), format!("{original}{payload}"));
                let started = Instant::now();
                self.fetch(target, params).await;
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed - base_latency >= threshold * 0.8 {
                    let evidence =
                        format!("delta={elapsed:.2}s base={base_latency:.2}s thr={threshold:.2}s");
                    self.record(target, Technique::TimeBased, param, payload.trim(), evidence, None)
                        .await;
                }
            }
            params.insert(param.clone(), original);
        }
    }

    /// Phase D: walk column counts until neither the numeric nor the
    /// string context shows a column-count mismatch, then confirm by
    /// injecting a quoted marker into the middle column.
    async fn union_phase(
        &self,
        target: &Target,
        params: &mut IndexMap<String, String>,
        names: &[String],
        baseline: &str,
    ) {
        for param in names {
            let original = params.get(param).cloned().unwrap_or_default();
            let mut column_count = None;

            for columns in 1..=self.config.union_max_columns {
                let probe = payloads::union_select(columns);
                params.insert(param.clone(), format!("{original}{probe}"));
                let numeric = self.fetch(target, params).await;
                params.insert(param.clone(), format!("{original}'{probe}"));
                let stringy = self.fetch(target, params).await;
                params.insert(param.clone(), original.clone());

                let numeric_clean = !numeric.body.is_empty() && !COLUMN_MISMATCH.is_match(&numeric.body);
                let stringy_clean = !stringy.body.is_empty() && !COLUMN_MISMATCH.is_match(&stringy.body);
                if (numeric_clean || stringy_clean)
                    && !COLUMN_MISMATCH.is_match(&numeric.body)
                    && !COLUMN_MISMATCH.is_match(&stringy.body)
                {
                    column_count = Some(columns);
                    break;
                }
            }

            let Some(columns) = column_count else {
                continue;
            };
            let confirm = payloads::union_marker_select(columns);
            params.insert(param.clone(), format!("{original}{confirm}"));
            let response = self.fetch(target, params).await;
            params.insert(param.clone(), original.clone());

            if !response.body.is_empty()
                && (response.body.contains(payloads::UNION_MARKER)
                    || differs(&response.body, baseline))
            {
                let evidence = format!("columns={columns}");
                self.record(
                    target,
                    Technique::UnionConfirmed,
                    param,
                    confirm.trim(),
                    evidence,
                    Some(columns),
                )
                .await;
            }
        }
    }
}

fn first_variant(base: &str) -> String {
    mutate(base)
        .into_iter()
        .next()
        .unwrap_or_else(|| base.to_string())
}
