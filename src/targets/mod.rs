//! Crawl targets and their generation
//!
//! A target is one route on one date (or one month view). Its identity is
//! the (origin, destination, date) triple; the attempt counter travels with
//! it but is not part of the identity.

mod generator;

pub use generator::{generate, TargetIter, TargetSpec};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date granularity of generated targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One target per calendar day
    #[default]
    Day,
    /// One target per calendar month, dated on the first of the month
    Month,
}

/// Identity of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.origin, self.destination, self.date)
    }
}

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    /// Finished fetch attempts, successful or not
    pub attempts: u32,
}

impl Target {
    /// Creates a fresh target with no attempts recorded
    pub fn new(origin: &str, destination: &str, date: NaiveDate) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            date,
            attempts: 0,
        }
    }

    /// Returns the identity of this target
    pub fn id(&self) -> TargetId {
        TargetId {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            date: self.date,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.origin, self.destination, self.date)
    }
}
