//! Monitor schedules and next-run computation.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};

use crate::error::ScrapelineError;

/// Shortest allowed interval between monitor runs.
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Recurrence of a monitor: a fixed interval or a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Interval { minutes: u32 },
    Cron { expression: String },
}

impl Schedule {
    pub fn every_minutes(minutes: u32) -> Result<Self, ScrapelineError> {
        let schedule = Self::Interval { minutes };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn cron(expression: &str) -> Result<Self, ScrapelineError> {
        let schedule = Self::Cron {
            expression: expression.trim().to_string(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), ScrapelineError> {
        match self {
            Self::Interval { minutes } if *minutes < MIN_INTERVAL_MINUTES => {
                Err(ScrapelineError::InvalidSchedule(format!(
                    "schedule must be at least {MIN_INTERVAL_MINUTES} minutes, got {minutes}"
                )))
            }
            Self::Interval { .. } => Ok(()),
            Self::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Interval { minutes } => format!("every {minutes} min"),
            Self::Cron { expression } => format!("cron '{expression}'"),
        }
    }
}

/// Schedule as callers supply it: interval minutes or a cron string.
///
/// An empty string means "no schedule" and removes an existing monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    Minutes(i64),
    Expression(String),
}

impl ScheduleSpec {
    /// Resolve into a validated schedule; `Ok(None)` clears the schedule.
    pub fn resolve(&self) -> Result<Option<Schedule>, ScrapelineError> {
        match self {
            Self::Minutes(m) => {
                let minutes = u32::try_from(*m).map_err(|_| {
                    ScrapelineError::InvalidSchedule(format!("invalid interval: {m}"))
                })?;
                Schedule::every_minutes(minutes).map(Some)
            }
            Self::Expression(expr) if expr.trim().is_empty() => Ok(None),
            Self::Expression(expr) => Schedule::cron(expr).map(Some),
        }
    }
}

/// Next run strictly after `last_run`.
pub fn compute_next_run(
    last_run: DateTime<Utc>,
    schedule: &Schedule,
) -> Result<DateTime<Utc>, ScrapelineError> {
    match schedule {
        Schedule::Interval { minutes } => Ok(last_run + Duration::minutes(i64::from(*minutes))),
        Schedule::Cron { expression } => parse_cron(expression)?
            .after(&last_run)
            .next()
            .ok_or_else(|| {
                ScrapelineError::InvalidSchedule(format!(
                    "cron '{expression}' has no upcoming run"
                ))
            }),
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`.
pub fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse_cron(expression: &str) -> Result<CronSchedule, ScrapelineError> {
    CronSchedule::from_str(&normalize_cron(expression)).map_err(|e| {
        ScrapelineError::InvalidSchedule(format!("invalid cron '{}': {e}", expression.trim()))
    })
}
