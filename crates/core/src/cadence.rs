//! Notification cadence policy and send-time resolution.
//!
//! A workflow either sends notifications immediately or batches them into a
//! digest that goes out at the next qualifying send time. The returned time
//! is always strictly after `now`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Hour used when a workflow does not configure a send time.
pub const DEFAULT_SEND_HOUR: u32 = 8;

/// Default weekday for weekly digests (0 = Monday).
pub const DEFAULT_WEEKDAY: u32 = 0;

/// Default day of month for monthly digests.
pub const DEFAULT_MONTH_DAY: u32 = 1;

/// When queued notifications for a workflow are flushed.
///
/// Parameters live inside the variant they belong to, so a weekday can never
/// be attached to a daily cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", rename_all = "snake_case")]
pub enum Cadence {
    Immediate,
    Daily,
    /// `weekday` is 0 = Monday ... 6 = Sunday.
    Weekly { weekday: u32 },
    /// `day` is clamped to the last day of short months.
    Monthly { day: u32 },
    /// Send on the date held in the named form field.
    FormFieldDate { field: String },
}

/// A cadence plus the time of day digests go out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadencePolicy {
    pub cadence: Cadence,
    pub send_time: NaiveTime,
}

/// Result of resolving a cadence at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule<Tz: TimeZone> {
    /// The caller sends right away; nothing is queued.
    Immediate,
    /// Queue for the digest going out at this time.
    At(DateTime<Tz>),
}

fn default_send_time() -> NaiveTime {
    NaiveTime::from_hms_opt(DEFAULT_SEND_HOUR, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

impl CadencePolicy {
    pub fn immediate() -> Self {
        Self {
            cadence: Cadence::Immediate,
            send_time: default_send_time(),
        }
    }

    /// Build a policy from the `workflows.notification_cadence*` columns.
    ///
    /// `day` means weekday for weekly cadences and day-of-month for monthly
    /// ones and is ignored otherwise. A missing `time` means 08:00.
    pub fn from_columns(
        cadence: &str,
        day: Option<i32>,
        time: Option<NaiveTime>,
        form_field: Option<&str>,
    ) -> Result<Self, CoreError> {
        let cadence = match cadence {
            "immediate" => Cadence::Immediate,
            "daily" => Cadence::Daily,
            "weekly" => {
                let weekday = day.unwrap_or(DEFAULT_WEEKDAY as i32);
                if !(0..=6).contains(&weekday) {
                    return Err(CoreError::Validation(format!(
                        "Weekly cadence day must be 0 (Monday) to 6 (Sunday), got {weekday}"
                    )));
                }
                Cadence::Weekly {
                    weekday: weekday as u32,
                }
            }
            "monthly" => {
                // Zero and absent both mean the first of the month.
                let month_day = match day {
                    None | Some(0) => DEFAULT_MONTH_DAY as i32,
                    Some(d) => d,
                };
                if !(1..=31).contains(&month_day) {
                    return Err(CoreError::Validation(format!(
                        "Monthly cadence day must be 1 to 31, got {month_day}"
                    )));
                }
                Cadence::Monthly {
                    day: month_day as u32,
                }
            }
            "form_field_date" => Cadence::FormFieldDate {
                field: form_field.unwrap_or_default().trim().to_string(),
            },
            other => {
                return Err(CoreError::Validation(format!(
                    "Invalid notification cadence '{other}'. Must be one of: \
                     immediate, daily, weekly, monthly, form_field_date"
                )))
            }
        };

        Ok(Self {
            cadence,
            send_time: time.unwrap_or_else(default_send_time),
        })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.cadence, Cadence::Immediate)
    }

    /// Database spelling of the cadence kind.
    pub fn kind(&self) -> &'static str {
        match self.cadence {
            Cadence::Immediate => "immediate",
            Cadence::Daily => "daily",
            Cadence::Weekly { .. } => "weekly",
            Cadence::Monthly { .. } => "monthly",
            Cadence::FormFieldDate { .. } => "form_field_date",
        }
    }

    /// Resolve when a notification raised at `now` should go out.
    ///
    /// `form_data` is the triggering submission's data, consulted only by
    /// [`Cadence::FormFieldDate`].
    pub fn schedule<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        form_data: Option<&serde_json::Value>,
    ) -> Schedule<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        let at = |date: NaiveDate| at_send_time(&tz, date, self.send_time);

        let next = match &self.cadence {
            Cadence::Immediate => return Schedule::Immediate,
            Cadence::Daily => {
                let candidate = at(today);
                if candidate <= *now {
                    at(add_days(today, 1))
                } else {
                    candidate
                }
            }
            Cadence::Weekly { weekday } => {
                let current = now.weekday().num_days_from_monday();
                let days_ahead = (weekday + 7 - current) % 7;
                let candidate = at(add_days(today, days_ahead));
                if days_ahead == 0 && candidate <= *now {
                    at(add_days(today, 7))
                } else {
                    candidate
                }
            }
            Cadence::Monthly { day } => {
                let candidate = at(clamped_date(today.year(), today.month(), *day));
                if candidate <= *now {
                    let (year, month) = if today.month() == 12 {
                        (today.year() + 1, 1)
                    } else {
                        (today.year(), today.month() + 1)
                    };
                    at(clamped_date(year, month, *day))
                } else {
                    candidate
                }
            }
            Cadence::FormFieldDate { field } => {
                let from_field = form_data
                    .and_then(|data| data.get(field.as_str()))
                    .and_then(value_as_date)
                    .map(&at)
                    .filter(|candidate| candidate > now);
                from_field.unwrap_or_else(|| at(add_days(today, 1)))
            }
        };

        Schedule::At(next)
    }
}

/// Free-function form of [`CadencePolicy::schedule`].
pub fn compute_scheduled_for<Tz: TimeZone>(
    policy: &CadencePolicy,
    now: &DateTime<Tz>,
    form_data: Option<&serde_json::Value>,
) -> Schedule<Tz> {
    policy.schedule(now, form_data)
}

fn at_send_time<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let local = date.and_time(time);
    // A send time inside a DST gap has no local reading; fall back to UTC.
    tz.from_local_datetime(&local)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}

fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(chrono::Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// Accepts `YYYY-MM-DD`, a naive ISO datetime, or RFC 3339.
fn value_as_date(value: &serde_json::Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
