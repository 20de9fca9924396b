//! Target generation
//!
//! Expands origin list x destination list x date range into targets, lazily
//! and in a fixed order: date-major, then destination, then origin. The order
//! is the tie-breaker the work queue uses, so a regenerated plan lines up
//! with a resumed checkpoint.

use crate::config::RoutesConfig;
use crate::targets::{Granularity, Target};
use crate::ConfigError;
use chrono::{Datelike, Months, NaiveDate};

/// The compact description of a crawl plan
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub granularity: Granularity,
}

impl TargetSpec {
    /// Builds a spec from the `[routes]` configuration section
    pub fn from_routes(routes: &RoutesConfig) -> Self {
        Self {
            origins: routes.origins.clone(),
            destinations: routes.destinations.clone(),
            start: routes.start_date,
            end: routes.end_date,
            granularity: routes.granularity,
        }
    }

    /// Number of targets the plan expands to, or None for an open range
    pub fn target_count(&self) -> Option<usize> {
        let end = self.end?;
        let mut dates = 0usize;
        let mut date = Some(first_date(self.start, self.granularity));
        while let Some(d) = date.filter(|d| *d <= end) {
            dates += 1;
            date = step(d, self.granularity);
        }
        Some(dates * self.origins.len() * self.destinations.len())
    }
}

/// Lazy iterator over the targets of a [`TargetSpec`]
#[derive(Debug, Clone)]
pub struct TargetIter {
    origins: Vec<String>,
    destinations: Vec<String>,
    granularity: Granularity,
    end: NaiveDate,
    current: Option<NaiveDate>,
    origin_idx: usize,
    destination_idx: usize,
}

/// Expands a spec into its target sequence
///
/// # Errors
///
/// * `ConfigError::UnboundedRange` - the plan has no end date
/// * `ConfigError::Validation` - empty origin/destination list, or start after end
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use fare_harvest::targets::{generate, Granularity, TargetSpec};
///
/// let spec = TargetSpec {
///     origins: vec!["MAD".into()],
///     destinations: vec!["HND".into()],
///     start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
///     end: NaiveDate::from_ymd_opt(2025, 6, 2),
///     granularity: Granularity::Day,
/// };
/// assert_eq!(generate(&spec).unwrap().count(), 2);
/// ```
pub fn generate(spec: &TargetSpec) -> Result<TargetIter, ConfigError> {
    let end = spec.end.ok_or(ConfigError::UnboundedRange)?;

    if spec.origins.is_empty() || spec.destinations.is_empty() {
        return Err(ConfigError::Validation(
            "origin and destination lists must not be empty".to_string(),
        ));
    }

    if spec.start > end {
        return Err(ConfigError::Validation(format!(
            "start date {} is after end date {}",
            spec.start, end
        )));
    }

    Ok(TargetIter {
        origins: spec.origins.clone(),
        destinations: spec.destinations.clone(),
        granularity: spec.granularity,
        end,
        current: Some(first_date(spec.start, spec.granularity)),
        origin_idx: 0,
        destination_idx: 0,
    })
}

fn first_date(start: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Day => start,
        Granularity::Month => start.with_day(1).unwrap_or(start),
    }
}

fn step(date: NaiveDate, granularity: Granularity) -> Option<NaiveDate> {
    match granularity {
        Granularity::Day => date.succ_opt(),
        Granularity::Month => date.checked_add_months(Months::new(1)),
    }
}

impl Iterator for TargetIter {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let date = self.current.filter(|d| *d <= self.end)?;

        let target = Target::new(
            &self.origins[self.origin_idx],
            &self.destinations[self.destination_idx],
            date,
        );

        self.origin_idx += 1;
        if self.origin_idx == self.origins.len() {
            self.origin_idx = 0;
            self.destination_idx += 1;
            if self.destination_idx == self.destinations.len() {
                self.destination_idx = 0;
                self.current = step(date, self.granularity);
            }
        }

        Some(target)
    }
}
