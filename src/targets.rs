//! Injectable targets derived from the crawl: URLs with query strings and
//! discovered forms, normalized and deduplicated.

use std::collections::HashSet;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use reqwest::Url;
use serde::Serialize;

use crate::crawler::DiscoveredForm;

/// Request method used to reach a target. Form methods other than `get`
/// are sent as form-encoded POSTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }

    pub(crate) fn from_form_attr(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("get") {
            Method::Get
        } else {
            Method::Post
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A probe target: method, URL without query string, and the ordered
/// parameter map. Immutable once built; the engine clones the parameter
/// map before mutating values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub method: Method,
    pub url: String,
    pub params: IndexMap<String, String>,
}

/// Builds the target list in two passes: GET parameters from every visited
/// URL carrying a query string, then all discovered forms. Duplicates
/// (same method, URL, and sorted parameter pairs) keep their first
/// occurrence.
pub fn collect_targets(visited: &IndexSet<String>, forms: &[DiscoveredForm]) -> Vec<Target> {
    let mut targets = Vec::new();

    for visited_url in visited {
        let Ok(url) = Url::parse(visited_url) else {
            continue;
        };
        if url.query().map_or(true, str::is_empty) {
            continue;
        }
        let mut params: IndexMap<String, String> = IndexMap::new();
        for (key, value) in url.query_pairs() {
            // First value wins for repeated keys.
            params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        let mut stripped = url.clone();
        stripped.set_query(None);
        targets.push(Target {
            method: Method::Get,
            url: stripped.to_string(),
            params,
        });
    }

    for form in forms {
        targets.push(Target {
            method: form.method,
            url: form.action.clone(),
            params: form.inputs.clone(),
        });
    }

    dedup(targets)
}

fn dedup(targets: Vec<Target>) -> Vec<Target> {
    let mut seen: HashSet<(Method, String, Vec<(String, String)>)> = HashSet::new();
    let mut unique = Vec::new();
    for target in targets {
        let mut pairs: Vec<(String, String)> = target
            .params
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        pairs.sort();
        if seen.insert((target.method, target.url.clone(), pairs)) {
            unique.push(target);
        }
    }
    unique
}
