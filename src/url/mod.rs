//! URL handling for fare-harvest
//!
//! Renders the configured URL template for a target and extracts the domain
//! key used for per-domain rate limiting.

mod domain;

pub use domain::extract_domain;

use crate::targets::Target;
use url::Url;

/// Renders the request URL for a target
///
/// Supported placeholders:
///
/// | Placeholder     | Value                        |
/// |-----------------|------------------------------|
/// | `{origin}`      | origin code, lowercased      |
/// | `{destination}` | destination code, lowercased |
/// | `{date}`        | `YYYY-MM-DD`                 |
/// | `{yymm}`        | two-digit year and month     |
/// | `{dd}`          | two-digit day of month       |
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use fare_harvest::targets::Target;
/// use fare_harvest::url::render_target_url;
///
/// let target = Target::new("MAD", "HND", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
/// let url = render_target_url(
///     "https://www.example.es/vuelos/{origin}/{destination}/?oym={yymm}&selectedoday={dd}",
///     &target,
/// )
/// .unwrap();
/// assert_eq!(url.as_str(), "https://www.example.es/vuelos/mad/hnd/?oym=2603&selectedoday=01");
/// ```
pub fn render_target_url(template: &str, target: &Target) -> Result<Url, url::ParseError> {
    let rendered = template
        .replace("{origin}", &target.origin.to_lowercase())
        .replace("{destination}", &target.destination.to_lowercase())
        .replace("{date}", &target.date.format("%Y-%m-%d").to_string())
        .replace("{yymm}", &target.date.format("%y%m").to_string())
        .replace("{dd}", &target.date.format("%d").to_string());

    Url::parse(&rendered)
}
