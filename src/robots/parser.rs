//! robots.txt evaluation
//!
//! Allow/Disallow matching is delegated to the robotstxt crate. That crate
//! does not expose Crawl-delay, so the directive is read here.

use robotstxt::DefaultMatcher;

/// A domain's robots.txt policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsPolicy {
    /// Raw robots.txt body; None allows everything
    body: Option<String>,
}

impl RobotsPolicy {
    /// Builds a policy from a robots.txt body
    pub fn parse(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
        }
    }

    /// A policy with no restrictions, used when robots.txt is missing or unreachable
    pub fn allow_all() -> Self {
        Self { body: None }
    }

    /// Whether this policy places no restrictions at all
    pub fn is_allow_all(&self) -> bool {
        self.body.as_deref().map_or(true, |b| b.trim().is_empty())
    }

    /// Checks whether `url` may be fetched by `agent`
    ///
    /// `url` may be an absolute URL or a path.
    pub fn allows(&self, url: &str, agent: &str) -> bool {
        match self.body.as_deref() {
            Some(body) if !body.trim().is_empty() => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent, url)
            }
            _ => true,
        }
    }

    /// Crawl-delay in seconds for `agent`
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, agent: &str) -> Option<f64> {
        let body = self.body.as_deref()?;
        let agent = agent.to_ascii_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut group_open = false;
        let mut specific = None;
        let mut wildcard = None;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                // A user-agent line after rules starts a new group
                if !group_open {
                    group.clear();
                    group_open = true;
                }
                group.push(value.to_ascii_lowercase());
                continue;
            }
            group_open = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(delay) = value.parse::<f64>() else {
                continue;
            };

            if group.iter().any(|ua| !ua.is_empty() && ua != "*" && agent.contains(ua.as_str())) {
                specific.get_or_insert(delay);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard.get_or_insert(delay);
            }
        }

        specific.or(wildcard)
    }
}
