use std::fmt::Display;

use chrono::{Datelike, Timelike};
use tokio::task_local;

task_local! {
    pub static FIXED_NOW: DateTime;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    delegate: chrono::DateTime<chrono::Local>,
}

impl DateTime {
    fn new<T: chrono::TimeZone>(delegate: chrono::DateTime<T>) -> Self {
        Self {
            delegate: delegate.with_timezone(&chrono::Local),
        }
    }

    pub fn now() -> Self {
        FIXED_NOW
            .try_with(|t| *t)
            .unwrap_or_else(|_| chrono::Local::now().into())
    }

    pub fn from_iso(iso8601: &str) -> anyhow::Result<Self> {
        Ok(chrono::DateTime::parse_from_rfc3339(iso8601)?.into())
    }

    pub fn to_iso_string(&self) -> String {
        self.delegate.to_rfc3339()
    }

    pub fn to_human_readable(&self) -> String {
        chrono_humanize::HumanTime::from(self.delegate).to_string()
    }

    pub fn date(&self) -> chrono::NaiveDate {
        self.delegate.date_naive()
    }

    pub fn hour(&self) -> u32 {
        self.delegate.hour()
    }

    pub fn month(&self) -> u32 {
        self.delegate.month()
    }

    pub fn plus_days(&self, days: i64) -> Self {
        //failing only at the edges of what can be stored in a date-time
        self.delegate
            .checked_add_signed(chrono::Duration::days(days))
            .unwrap()
            .into()
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.delegate)
    }
}

impl<T: chrono::TimeZone> From<chrono::DateTime<T>> for DateTime {
    fn from(val: chrono::DateTime<T>) -> Self {
        DateTime::new(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_now_overrides_clock() {
        let fixed = DateTime::from_iso("2026-06-15T12:30:00+02:00").unwrap();

        FIXED_NOW
            .scope(fixed, async {
                assert_eq!(DateTime::now(), fixed);
                assert_eq!(DateTime::now().hour(), fixed.hour());
                assert_eq!(DateTime::now().month(), fixed.month());
            })
            .await;
    }

    #[test]
    fn test_plus_days_advances_calendar_date() {
        let dt = DateTime::from_iso("2026-01-31T08:00:00+01:00").unwrap();
        assert_eq!(dt.plus_days(1).date(), dt.date().succ_opt().unwrap());
    }
}
