//! robots.txt handling
//!
//! Policies are fetched once per domain through the same rate limiter as
//! ordinary requests, then cached. Anything other than a 2xx answer means
//! the site has no usable policy and everything is allowed.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::RobotsPolicy;

use url::Url;

/// Builds the robots.txt URL for the site serving `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    url.host_str()?;
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}

/// Interprets a robots.txt response
///
/// 4xx and 5xx answers both mean allow-all.
pub fn policy_from_response(status_code: u16, body: &[u8]) -> RobotsPolicy {
    if (200..300).contains(&status_code) {
        RobotsPolicy::parse(&String::from_utf8_lossy(body))
    } else {
        RobotsPolicy::allow_all()
    }
}
