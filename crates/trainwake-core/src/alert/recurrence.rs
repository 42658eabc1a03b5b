//! Recurrence rules for repeating alerts.
//!
//! Rules are written as `once`, `daily`, `weekdays`, `weekends` or
//! `custom:mon,wed,fri`. Day-of-week is evaluated in the caller's time zone
//! so a 23:30 local departure is not attributed to the next UTC day.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::model::Occurrence;
use crate::error::SetupError;

/// Upper bound on the day search; any valid rule matches within a week.
const MAX_SEARCH_DAYS: i64 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recurrence {
    #[default]
    Once,
    Daily,
    Weekdays,
    Weekends,
    /// Explicit day set, sorted Monday first and deduplicated.
    Custom(Vec<Weekday>),
}

impl Recurrence {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Recurrence::Once)
    }

    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            Recurrence::Once | Recurrence::Daily => true,
            Recurrence::Weekdays => !matches!(day, Weekday::Sat | Weekday::Sun),
            Recurrence::Weekends => matches!(day, Weekday::Sat | Weekday::Sun),
            Recurrence::Custom(days) => days.contains(&day),
        }
    }

    /// The first occurrence after `current` whose local departure day matches
    /// the rule and whose departure lies after `after`.
    ///
    /// Returns `None` for one-shot alerts.
    pub fn next_occurrence(
        &self,
        current: &Occurrence,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<Occurrence> {
        if !self.is_repeating() {
            return None;
        }

        let journey = current.duration();
        let local = current.departure_at.with_timezone(&tz).naive_local();

        // Skip whole days already in the past before scanning day by day.
        let behind_days = (after - current.departure_at).num_days().max(0);
        let mut offset = behind_days;
        let limit = behind_days + MAX_SEARCH_DAYS;

        while offset <= limit {
            offset += 1;
            let candidate_local = local + Duration::days(offset);
            let Some(candidate) = tz
                .from_local_datetime(&candidate_local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
            else {
                // Local time skipped by a DST transition.
                continue;
            };

            if candidate <= after || !self.matches(candidate_local.weekday()) {
                continue;
            }

            return Some(Occurrence {
                departure_at: candidate,
                arrival_at: candidate + journey,
            });
        }
        None
    }
}

fn parse_weekday(token: &str) -> Result<Weekday, SetupError> {
    let day = match token.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        other => {
            return Err(SetupError::MalformedRecurrence(format!(
                "unknown day '{other}'"
            )))
        }
    };
    Ok(day)
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl FromStr for Recurrence {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "once" | "" => return Ok(Recurrence::Once),
            "daily" => return Ok(Recurrence::Daily),
            "weekdays" => return Ok(Recurrence::Weekdays),
            "weekends" => return Ok(Recurrence::Weekends),
            _ => {}
        }

        let Some(days) = s
            .split_once(':')
            .filter(|(kind, _)| kind.eq_ignore_ascii_case("custom"))
            .map(|(_, days)| days)
        else {
            return Err(SetupError::MalformedRecurrence(format!(
                "unrecognised rule '{s}'"
            )));
        };

        let mut parsed = days
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .map(parse_weekday)
            .collect::<Result<Vec<_>, _>>()?;

        if parsed.is_empty() {
            return Err(SetupError::MalformedRecurrence(
                "custom rule names no days".into(),
            ));
        }

        parsed.sort_by_key(|d| d.num_days_from_monday());
        parsed.dedup();
        Ok(Recurrence::Custom(parsed))
    }
}

impl TryFrom<String> for Recurrence {
    type Error = SetupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Recurrence> for String {
    fn from(value: Recurrence) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Once => f.write_str("once"),
            Recurrence::Daily => f.write_str("daily"),
            Recurrence::Weekdays => f.write_str("weekdays"),
            Recurrence::Weekends => f.write_str("weekends"),
            Recurrence::Custom(days) => {
                let days: Vec<_> = days.iter().map(|d| weekday_token(*d)).collect();
                write!(f, "custom:{}", days.join(","))
            }
        }
    }
}
