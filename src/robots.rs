//! Scan-wide `robots.txt` policy.
//!
//! Fetched once at scan start with the session user agent. A missing,
//! empty, or unreadable file behaves as allow-all; the crawler consults
//! [`RobotsPolicy::can_fetch`] for every candidate URL and form action.

use reqwest::Url;
use robotstxt::DefaultMatcher;

use crate::client::HttpClient;
use crate::targets::Method;

pub struct RobotsPolicy {
    body: Option<String>,
    user_agent: String,
}

impl RobotsPolicy {
    /// Policy that permits every URL. Used when `respect_robots` is off or
    /// the robots file could not be fetched.
    pub fn allow_all(user_agent: &str) -> Self {
        Self {
            body: None,
            user_agent: user_agent.to_string(),
        }
    }

    /// Fetches `scheme://authority/robots.txt` through the shared client
    /// (the request counts toward the concurrency cap and retry policy).
    pub async fn load(client: &HttpClient, seed: &Url, user_agent: &str) -> Self {
        let Some(host) = seed.host_str() else {
            return Self::allow_all(user_agent);
        };
        let authority = match seed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let robots_url = format!("{}://{}/robots.txt", seed.scheme(), authority);

        let response = client.fetch(&robots_url, Method::Get, None).await;
        if response.ok && !response.body.is_empty() {
            tracing::info!("Loaded robots.txt from {robots_url}.");
            Self {
                body: Some(response.body),
                user_agent: user_agent.to_string(),
            }
        } else {
            tracing::debug!("No usable robots.txt at {robots_url}, allowing all.");
            Self::allow_all(user_agent)
        }
    }

    /// True when the session user agent may fetch `url`.
    pub fn can_fetch(&self, url: &str) -> bool {
        match &self.body {
            None => true,
            Some(body) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(body, &self.user_agent, url)
            }
        }
    }

    #[cfg(test)]
    fn from_body(body: &str, user_agent: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            user_agent: user_agent.to_string(),
        }
    }
}
