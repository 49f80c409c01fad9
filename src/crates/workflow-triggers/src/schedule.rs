//! Schedule trigger: a standard five-field cron expression plus an IANA timezone. Next-fire
//! time is computed locally and persisted; drift is corrected by comparing
//! wall clock on each fire rather than trusting the previously computed
//! instant.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, TriggerError};

/// One active schedule bound to a project's start step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub start_step_id: Uuid,
    pub cron_expression: String,
    pub timezone: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub active: bool,
}

impl Schedule {
    /// Parses `cron_expression`/`timezone` and returns the next fire time
    /// strictly after `after` (local wall clock comparison, 
    /// "drift is corrected by comparing wall clock on each fire").
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| invalid(&self.cron_expression, "unknown IANA timezone"))?;
        let schedule = CronSchedule::from_str(&six_field(&self.cron_expression))
            .map_err(|e| invalid(&self.cron_expression, &e.to_string()))?;
        let local_after = after.with_timezone(&tz);
        Ok(schedule.after(&local_after).next().map(|dt| dt.with_timezone(&Utc)))
    }
}

/// The `cron` crate requires a leading seconds field; "standard
/// 5-field cron" omits it, so a 5-field expression is widened with an
/// implicit `0` seconds.
fn six_field(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn invalid(expr: &str, detail: &str) -> TriggerError {
    TriggerError::SchemaValidation(vec![crate::error::SchemaViolation {
        field: "cron_expression".to_string(),
        message: format!("`{expr}`: {detail}"),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            start_step_id: Uuid::new_v4(),
            cron_expression: "0 0 * * * *".to_string(),
            timezone: "UTC".to_string(),
            input: serde_json::json!({}),
            active: true,
        }
    }

    #[test]
    fn computes_the_next_top_of_hour_fire() {
        let schedule = sample();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let next = schedule.next_fire_after(now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn rejects_a_malformed_expression() {
        let mut schedule = sample();
        schedule.cron_expression = "not a cron expr".to_string();
        assert!(schedule.next_fire_after(Utc::now()).is_err());
    }
}
