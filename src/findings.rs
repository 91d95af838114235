//! Finding records, risk scoring, enrichment, and the deduplicating store.

use std::collections::HashSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::targets::Method;

/// Detection technique that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Technique {
    ErrorBased,
    BooleanBlind,
    TimeBased,
    UnionConfirmed,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::ErrorBased => "error-based",
            Technique::BooleanBlind => "boolean-blind",
            Technique::TimeBased => "time-based",
            Technique::UnionConfirmed => "union-confirmed",
        }
    }

    pub fn risk(&self) -> Risk {
        match self {
            Technique::UnionConfirmed => Risk::Critical,
            Technique::ErrorBased => Risk::High,
            Technique::BooleanBlind | Technique::TimeBased => Risk::Medium,
        }
    }

    fn base_score(&self) -> f64 {
        match self {
            Technique::UnionConfirmed => 9.8,
            Technique::ErrorBased => 8.6,
            Technique::BooleanBlind => 7.5,
            Technique::TimeBased => 7.0,
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative risk bucket derived from the technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Risk {
    Critical,
    High,
    Medium,
    Low,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Critical => "Critical",
            Risk::High => "High",
            Risk::Medium => "Medium",
            Risk::Low => "Low",
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted detection, enriched with score, risk, DBMS guess and
/// remediation guidance.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub url: String,
    #[serde(rename = "type")]
    pub method: Method,
    pub param: String,
    pub technique: Technique,
    pub payload: String,
    pub evidence: String,
    pub risk: Risk,
    pub score: f64,
    pub fix_snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

lazy_static! {
    static ref COLUMNS_EVIDENCE: Regex = Regex::new(r"columns=(\d+)").unwrap();
    static ref DIFFS_EVIDENCE: Regex = Regex::new(r"diffs=(\d+)").unwrap();
    static ref PROX_EVIDENCE: Regex = Regex::new(r"prox=(\d+)").unwrap();
    static ref SQLSTATE_TOKEN: Regex = RegexBuilder::new(r"SQLSTATE\[")
        .case_insensitive(true)
        .build()
        .unwrap();
    static ref SQLITE_TOKENS: Regex =
        RegexBuilder::new(r#"near ".*": syntax error|no such column|unrecognized token|unterminated (?:quoted )?string"#)
            .case_insensitive(true)
            .build()
            .unwrap();
    static ref MYSQL_TOKENS: Regex = RegexBuilder::new(r"You have an error in your SQL syntax|mysql_")
        .case_insensitive(true)
        .build()
        .unwrap();
}

/// Base score by technique, adjusted by evidence markers and clamped to
/// `[0.0, 10.0]` with one decimal of precision.
pub fn score_for(technique: Technique, evidence: &str) -> f64 {
    let mut score = technique.base_score();
    if let Some(columns) = captured_number(&COLUMNS_EVIDENCE, evidence) {
        score += (columns as f64 * 0.05).min(0.5);
    }
    if let Some(diffs) = captured_number(&DIFFS_EVIDENCE, evidence) {
        score += (diffs as f64 * 0.05).min(0.3);
    }
    if let Some(prox) = captured_number(&PROX_EVIDENCE, evidence) {
        if prox < 200 {
            score += 0.2;
        }
    }
    ((score * 10.0).round() / 10.0).clamp(0.0, 10.0)
}

fn captured_number(pattern: &Regex, evidence: &str) -> Option<u64> {
    pattern
        .captures(evidence)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Heuristic DBMS identification from the evidence text.
pub fn guess_dbms(technique: Technique, evidence: &str) -> &'static str {
    if SQLSTATE_TOKEN.is_match(evidence) {
        "Unknown (PDO / SQLSTATE)"
    } else if SQLITE_TOKENS.is_match(evidence) {
        "SQLite"
    } else if MYSQL_TOKENS.is_match(evidence) {
        "MySQL"
    } else if technique == Technique::BooleanBlind {
        "Generic SQL injection"
    } else {
        "Unknown"
    }
}

/// Remediation guidance per technique family.
pub fn remediation(technique: Technique) -> &'static str {
    match technique {
        Technique::ErrorBased => {
            "Use prepared statements/parameterized queries. Do not concatenate input. \
             Validate inputs. Disable detailed DB errors in production; log server-side."
        }
        Technique::BooleanBlind => {
            "Use parameterized queries and strict input validation (whitelists). \
             Apply least-privilege DB accounts and normalize responses for invalid conditions."
        }
        Technique::UnionConfirmed => {
            "Use bound parameters; cast/validate inputs to expected types. Restrict selectable columns."
        }
        Technique::TimeBased => {
            "Use parameterized queries and input validation; avoid string concatenation."
        }
    }
}

fn fix_snippet(param: &str) -> String {
    format!(
        "// PHP PDO example\n\
         $stmt = $pdo->prepare('SELECT * FROM table WHERE {param} = ?');\n\
         $stmt->execute([$value]);\n\
         $row = $stmt->fetch();\n"
    )
}

type FindingKey = (String, Method, String, Technique, Option<String>);

/// Insert-if-absent finding set preserving discovery order.
///
/// With noise grouping the identity is `(url, method, param, technique)`;
/// without it the payload joins the key so every distinct payload hit is
/// kept.
#[derive(Debug)]
pub struct FindingStore {
    noise_grouping: bool,
    seen: HashSet<FindingKey>,
    findings: Vec<Finding>,
}

impl FindingStore {
    pub fn new(noise_grouping: bool) -> Self {
        Self {
            noise_grouping,
            seen: HashSet::new(),
            findings: Vec::new(),
        }
    }

    /// Records a detection unless an equivalent one is already present.
    /// Returns the enriched finding on insertion.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        url: &str,
        method: Method,
        param: &str,
        technique: Technique,
        payload: &str,
        evidence: String,
        columns: Option<usize>,
    ) -> Option<&Finding> {
        let grouped_payload = if self.noise_grouping {
            None
        } else {
            Some(payload.to_string())
        };
        let key = (
            url.to_string(),
            method,
            param.to_string(),
            technique,
            grouped_payload,
        );
        if !self.seen.insert(key) {
            return None;
        }

        let score = score_for(technique, &evidence);
        let dbms = guess_dbms(technique, &evidence).to_string();
        let solution = remediation(technique).to_string();
        self.findings.push(Finding {
            url: url.to_string(),
            method,
            param: param.to_string(),
            technique,
            payload: payload.to_string(),
            evidence,
            risk: technique.risk(),
            score,
            fix_snippet: fix_snippet(param),
            columns,
            dbms: Some(dbms),
            solution: Some(solution),
        });
        self.findings.last()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_scores_by_technique() {
        assert_eq!(score_for(Technique::UnionConfirmed, ""), 9.8);
        assert_eq!(score_for(Technique::ErrorBased, ""), 8.6);
        assert_eq!(score_for(Technique::BooleanBlind, ""), 7.5);
        assert_eq!(score_for(Technique::TimeBased, ""), 7.0);
    }

    #[test]
    fn evidence_markers_raise_the_score() {
        let with_diffs = score_for(Technique::BooleanBlind, "rounds=3 diffs=3 sim_avg=0.512");
        assert!(with_diffs > 7.5 && with_diffs <= 7.7);

        let near_prox = score_for(Technique::ErrorBased, "no such column | status=200 | prox=42");
        assert_eq!(near_prox, 8.8);

        let far_prox = score_for(Technique::ErrorBased, "no such column | status=200 | prox=900");
        assert_eq!(far_prox, 8.6);
    }

    #[test]
    fn score_is_clamped_to_ten() {
        let score = score_for(Technique::UnionConfirmed, "columns=40 diffs=40 prox=1");
        assert!(score <= 10.0);
    }

    #[test]
    fn risk_follows_technique() {
        assert_eq!(Technique::UnionConfirmed.risk(), Risk::Critical);
        assert_eq!(Technique::ErrorBased.risk(), Risk::High);
        assert_eq!(Technique::BooleanBlind.risk(), Risk::Medium);
        assert_eq!(Technique::TimeBased.risk(), Risk::Medium);
    }

    #[test]
    fn dbms_guess_prefers_tokens_over_technique() {
        assert_eq!(
            guess_dbms(Technique::ErrorBased, "SQLSTATE[HY000] | status=200 | prox=1"),
            "Unknown (PDO / SQLSTATE)"
        );
        assert_eq!(guess_dbms(Technique::ErrorBased, "no such column | status=200 | prox=1"), "SQLite");
        assert_eq!(
            guess_dbms(Technique::ErrorBased, "You have an error in your SQL syntax | status=200 | prox=1"),
            "MySQL"
        );
        assert_eq!(
            guess_dbms(Technique::BooleanBlind, "rounds=3 diffs=3 sim_avg=0.2"),
            "Generic SQL injection"
        );
        assert_eq!(guess_dbms(Technique::TimeBased, "delta=2.2s base=0.1s thr=2.0s"), "Unknown");
    }

    #[test]
    fn grouped_store_collapses_payload_variants() {
        let mut store = FindingStore::new(true);
        assert!(store
            .record("http://h/", Method::Get, "id", Technique::ErrorBased, "'", "e1".into(), None)
            .is_some());
        assert!(store
            .record("http://h/", Method::Get, "id", Technique::ErrorBased, "''", "e2".into(), None)
            .is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ungrouped_store_keeps_distinct_payloads() {
        let mut store = FindingStore::new(false);
        store.record("http://h/", Method::Get, "id", Technique::ErrorBased, "'", "e1".into(), None);
        store.record("http://h/", Method::Get, "id", Technique::ErrorBased, "''", "e2".into(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn record_enriches_findings() {
        let mut store = FindingStore::new(true);
        let finding = store
            .record(
                "http://h/items",
                Method::Get,
                "id",
                Technique::UnionConfirmed,
                "UNION SELECT NULL,'ZXUNIONZX',NULL --",
                "columns=3".into(),
                Some(3),
            )
            .expect("first insert")
            .clone();
        assert_eq!(finding.risk, Risk::Critical);
        assert!(finding.score >= 9.8);
        assert_eq!(finding.columns, Some(3));
        assert!(finding.fix_snippet.contains("WHERE id = ?"));
        assert!(finding.dbms.is_some());
        assert!(finding.solution.unwrap().contains("bound parameters"));
    }

    #[test]
    fn serialized_finding_uses_wire_keys() {
        let mut store = FindingStore::new(true);
        let finding = store
            .record("http://h/", Method::Post, "q", Technique::BooleanBlind, "p", "rounds=3 diffs=3 sim_avg=0.1".into(), None)
            .expect("insert")
            .clone();
        let value = serde_json::to_value(&finding).expect("serialize");
        assert_eq!(value["type"], "POST");
        assert_eq!(value["technique"], "boolean-blind");
        assert_eq!(value["risk"], "Medium");
        assert!(value.get("columns").is_none());
    }
}
