//! Bounded breadth-first crawler.
//!
//! A single task owns the queue and the visited set. Each dequeued URL is
//! fetched at most once, followed by the politeness delay; links and forms
//! come out of a forgiving HTML parse, so malformed markup just yields
//! fewer nodes. Scope is host equality with the seed (port included), and
//! fragments are stripped before a URL enters the queue.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use reqwest::Url;
use scraper::{Html, Selector};
use tokio::time::{sleep, Duration};

use crate::client::HttpClient;
use crate::robots::RobotsPolicy;
use crate::targets::Method;

/// A `<form>` discovered during the crawl, normalized to an absolute
/// same-origin action with one default value per named field.
#[derive(Debug, Clone)]
pub struct DiscoveredForm {
    pub method: Method,
    pub action: String,
    pub inputs: IndexMap<String, String>,
}

/// Crawl phase output handed to target discovery.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub visited: IndexSet<String>,
    pub forms: Vec<DiscoveredForm>,
}

pub(crate) struct Crawler<'a> {
    pub client: &'a HttpClient,
    pub robots: &'a RobotsPolicy,
    pub max_depth: usize,
    pub delay: f64,
    pub chatty: bool,
}

struct PageExtract {
    links: Vec<String>,
    forms: Vec<DiscoveredForm>,
}

impl Crawler<'_> {
    #[tracing::instrument(skip(self, seed), fields(seed = %seed))]
    pub async fn crawl(&self, seed: &Url) -> CrawlOutcome {
        let scope = netloc(seed);
        let mut outcome = CrawlOutcome::default();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((seed.to_string(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if outcome.visited.contains(&url) || depth > self.max_depth {
                continue;
            }
            if !self.robots.can_fetch(&url) {
                if self.chatty {
                    tracing::info!("robots.txt disallows {url}, skipping.");
                } else {
                    tracing::debug!("robots.txt disallows {url}, skipping.");
                }
                continue;
            }
            outcome.visited.insert(url.clone());

            let response = self.client.fetch(&url, Method::Get, None).await;
            sleep(Duration::from_secs_f64(self.delay)).await;
            if response.body.is_empty() {
                continue;
            }
            let Ok(base) = Url::parse(&url) else {
                continue;
            };

            let page = extract_links_forms(&response.body, &base, &scope);
            tracing::debug!(
                "Extracted {} links and {} forms from {url}.",
                page.links.len(),
                page.forms.len()
            );

            for link in page.links {
                if !outcome.visited.contains(&link) && self.robots.can_fetch(&link) {
                    queue.push_back((link, depth + 1));
                }
            }
            for form in page.forms {
                if !self.robots.can_fetch(&form.action) {
                    continue;
                }
                if !outcome.visited.contains(&form.action) {
                    queue.push_back((form.action.clone(), depth + 1));
                }
                outcome.forms.push(form);
            }
        }

        outcome
    }
}

/// Pulls same-origin links and forms out of one page. Runs synchronously
/// so the non-`Send` DOM never crosses an await point.
fn extract_links_forms(html: &str, base: &Url, scope: &str) -> PageExtract {
    let document = Html::parse_document(html);
    let mut page = PageExtract {
        links: Vec::new(),
        forms: Vec::new(),
    };

    if let Ok(anchors) = Selector::parse("a[href]") {
        for element in document.select(&anchors) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if href.starts_with("javascript:") || href.starts_with("mailto:") {
                continue;
            }
            let Ok(mut absolute) = base.join(href) else {
                continue;
            };
            if netloc(&absolute) != scope {
                continue;
            }
            absolute.set_fragment(None);
            page.links.push(absolute.to_string());
        }
    }

    let Ok(form_selector) = Selector::parse("form") else {
        return page;
    };
    let Ok(field_selector) = Selector::parse("input, textarea, select") else {
        return page;
    };
    for form in document.select(&form_selector) {
        let method = Method::from_form_attr(form.value().attr("method").unwrap_or(""));
        let action_attr = form.value().attr("action").filter(|action| !action.is_empty());
        let action = match action_attr {
            Some(href) => match base.join(href) {
                Ok(url) => url,
                Err(_) => continue,
            },
            None => base.clone(),
        };
        if netloc(&action) != scope {
            continue;
        }

        let mut inputs = IndexMap::new();
        for field in form.select(&field_selector) {
            let Some(name) = field.value().attr("name") else {
                continue;
            };
            let value = field.value().attr("value").filter(|value| !value.is_empty());
            inputs.insert(name.to_string(), value.unwrap_or("test").to_string());
        }
        page.forms.push(DiscoveredForm {
            method,
            action: action.to_string(),
            inputs,
        });
    }

    page
}

/// Host plus non-default port, the same-origin identity for this scan.
pub(crate) fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
