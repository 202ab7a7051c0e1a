//! Next-run computation
//!
//! Calendar math for every schedule kind. All boundary rules live here:
//! day-of-month clamping (a monthly schedule on the 31st falls back to the
//! last day of short months), Feb-29 fallback for yearly schedules in
//! non-leap years, the never-succeeded fast path for monthly tasks, and
//! interval catch-up when the computed time is already past.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tapeflow_core::{Result, ScheduleType, TapeflowError};
use tapeflow_db::models::ScheduledTask;

/// Unit of an interval schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

fn default_time() -> String {
    "02:00:00".to_string()
}

fn default_unit() -> IntervalUnit {
    IntervalUnit::Minutes
}

#[derive(Debug, Deserialize)]
struct OnceConfig {
    datetime: String,
}

#[derive(Debug, Deserialize)]
struct IntervalConfig {
    interval: i64,
    #[serde(default = "default_unit")]
    unit: IntervalUnit,
}

#[derive(Debug, Deserialize)]
struct DailyConfig {
    #[serde(default = "default_time")]
    time: String,
}

#[derive(Debug, Deserialize)]
struct WeeklyConfig {
    /// 0 = Monday .. 6 = Sunday
    day_of_week: u32,
    #[serde(default = "default_time")]
    time: String,
}

#[derive(Debug, Deserialize)]
struct MonthlyConfig {
    day_of_month: u32,
    #[serde(default = "default_time")]
    time: String,
}

#[derive(Debug, Deserialize)]
struct YearlyConfig {
    month: u32,
    day: u32,
    #[serde(default = "default_time")]
    time: String,
}

#[derive(Debug, Deserialize)]
struct CronConfig {
    cron: String,
}

/// Validate a schedule config against its kind's shape; used at the API
/// boundary so malformed configs are rejected at create/update, not at fire
/// time.
pub fn validate_schedule_config(schedule_type: ScheduleType, config: &Value) -> Result<()> {
    let invalid = |e: &dyn std::fmt::Display| {
        TapeflowError::Validation(format!(
            "invalid {} schedule config: {}",
            schedule_type, e
        ))
    };

    match schedule_type {
        ScheduleType::Once => {
            let parsed: OnceConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            parse_datetime(&parsed.datetime)?;
        }
        ScheduleType::Interval => {
            let parsed: IntervalConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            if parsed.interval <= 0 {
                return Err(invalid(&"interval must be positive"));
            }
        }
        ScheduleType::Daily => {
            let parsed: DailyConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            parse_time(&parsed.time)?;
        }
        ScheduleType::Weekly => {
            let parsed: WeeklyConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            if parsed.day_of_week > 6 {
                return Err(invalid(&"day_of_week must be 0..=6 (Monday..Sunday)"));
            }
            parse_time(&parsed.time)?;
        }
        ScheduleType::Monthly => {
            let parsed: MonthlyConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            if !(1..=31).contains(&parsed.day_of_month) {
                return Err(invalid(&"day_of_month must be 1..=31"));
            }
            parse_time(&parsed.time)?;
        }
        ScheduleType::Yearly => {
            let parsed: YearlyConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            if !(1..=12).contains(&parsed.month) {
                return Err(invalid(&"month must be 1..=12"));
            }
            if !(1..=31).contains(&parsed.day) {
                return Err(invalid(&"day must be 1..=31"));
            }
            parse_time(&parsed.time)?;
        }
        ScheduleType::Cron => {
            let parsed: CronConfig =
                serde_json::from_value(config.clone()).map_err(|e| invalid(&e))?;
            cron::Schedule::from_str(&normalize_cron(&parsed.cron)).map_err(|e| invalid(&e))?;
        }
    }
    Ok(())
}

/// Compute the next fire time of a task relative to `now`. `Ok(None)` means
/// the task will never fire again (a one-off whose time has passed).
pub fn calculate_next_run_time(
    task: &ScheduledTask,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match task.schedule_type {
        ScheduleType::Once => {
            let config: OnceConfig = parse_config(task)?;
            let at = parse_datetime(&config.datetime)?;
            if at <= now {
                return Ok(None);
            }
            Ok(Some(at))
        }
        ScheduleType::Interval => {
            let config: IntervalConfig = parse_config(task)?;
            let delta = match config.unit {
                IntervalUnit::Minutes => Duration::minutes(config.interval),
                IntervalUnit::Hours => Duration::hours(config.interval),
                IntervalUnit::Days => Duration::days(config.interval),
            };
            let next = match task.last_run_time {
                None => now + delta,
                Some(last) => {
                    let candidate = last + delta;
                    if candidate <= now {
                        now + delta
                    } else {
                        candidate
                    }
                }
            };
            Ok(Some(next))
        }
        ScheduleType::Daily => {
            let config: DailyConfig = parse_config(task)?;
            let time = parse_time(&config.time)?;
            let mut next = at_time(now.date_naive(), time);
            if next <= now {
                next = next + Duration::days(1);
            }
            Ok(Some(next))
        }
        ScheduleType::Weekly => {
            let config: WeeklyConfig = parse_config(task)?;
            let time = parse_time(&config.time)?;
            let current_dow = now.date_naive().weekday().num_days_from_monday();
            let mut days_ahead = config.day_of_week as i64 - current_dow as i64;
            if days_ahead < 0 || (days_ahead == 0 && now.time() >= time) {
                days_ahead += 7;
            }
            let date = now.date_naive() + Duration::days(days_ahead);
            Ok(Some(at_time(date, time)))
        }
        ScheduleType::Monthly => {
            // a monthly task that has never succeeded fires promptly after
            // load instead of waiting for its calendar day
            if task.last_success_time.is_none() {
                return Ok(Some(now + Duration::minutes(1)));
            }

            let config: MonthlyConfig = parse_config(task)?;
            let time = parse_time(&config.time)?;

            let this_month = clamped_date(now.year(), now.month(), config.day_of_month);
            let mut next = at_time(this_month, time);
            if next <= now {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                next = at_time(clamped_date(year, month, config.day_of_month), time);
            }
            Ok(Some(next))
        }
        ScheduleType::Yearly => {
            let config: YearlyConfig = parse_config(task)?;
            let time = parse_time(&config.time)?;

            let mut next = at_time(clamped_date(now.year(), config.month, config.day), time);
            if next <= now {
                next = at_time(
                    clamped_date(now.year() + 1, config.month, config.day),
                    time,
                );
            }
            Ok(Some(next))
        }
        ScheduleType::Cron => {
            let config: CronConfig = parse_config(task)?;
            let schedule = cron::Schedule::from_str(&normalize_cron(&config.cron))
                .map_err(|e| TapeflowError::Validation(format!("invalid cron: {}", e)))?;
            Ok(schedule.after(&now).next())
        }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(task: &ScheduledTask) -> Result<T> {
    serde_json::from_value(task.schedule_config.clone()).map_err(|e| {
        TapeflowError::Validation(format!(
            "invalid {} schedule config for task {}: {}",
            task.schedule_type, task.task_name, e
        ))
    })
}

/// Accept `HH:MM` and `HH:MM:SS`
fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| TapeflowError::Validation(format!("invalid time of day: {}", value)))
}

/// Accept `YYYY-MM-DD HH:MM:SS` and RFC 3339
fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TapeflowError::Validation(format!("invalid datetime: {}", value)))
}

/// Five-field cron expressions get a leading seconds column
pub fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.min(days_in_month(year, month)).max(1);
    // both components are clamped into range above
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).expect("valid month"))
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tapeflow_core::{ActionKind, ScheduledTaskStatus};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn task_with(schedule_type: ScheduleType, config: Value) -> ScheduledTask {
        ScheduledTask {
            id: 1,
            task_name: "calc-test".to_string(),
            description: None,
            status: ScheduledTaskStatus::Active,
            schedule_type,
            schedule_config: config,
            action_type: ActionKind::HealthCheck,
            action_config: json!({}),
            next_run_time: None,
            last_run_time: None,
            last_success_time: None,
            last_failure_time: None,
            total_runs: 0,
            success_runs: 0,
            failure_runs: 0,
            average_duration: None,
            last_error: None,
            enabled: true,
            task_metadata: json!({}),
            tags: json!([]),
            backup_task_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_once_in_future_fires_once() {
        let task = task_with(
            ScheduleType::Once,
            json!({"datetime": "2026-12-25 14:30:00"}),
        );
        let next = calculate_next_run_time(&task, utc("2026-06-01T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-12-25T14:30:00Z")));
    }

    #[test]
    fn test_once_in_past_never_fires() {
        let task = task_with(
            ScheduleType::Once,
            json!({"datetime": "2025-01-01 00:00:00"}),
        );
        let next = calculate_next_run_time(&task, utc("2026-06-01T00:00:00Z")).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_interval_anchors_on_last_run() {
        let mut task = task_with(
            ScheduleType::Interval,
            json!({"interval": 30, "unit": "minutes"}),
        );
        let now = utc("2026-06-01T10:00:00Z");

        // never run: from now
        assert_eq!(
            calculate_next_run_time(&task, now).unwrap(),
            Some(utc("2026-06-01T10:30:00Z"))
        );

        // recent run: anchored on it
        task.last_run_time = Some(utc("2026-06-01T09:45:00Z"));
        assert_eq!(
            calculate_next_run_time(&task, now).unwrap(),
            Some(utc("2026-06-01T10:15:00Z"))
        );

        // stale run: catch up from now
        task.last_run_time = Some(utc("2026-06-01T08:00:00Z"));
        assert_eq!(
            calculate_next_run_time(&task, now).unwrap(),
            Some(utc("2026-06-01T10:30:00Z"))
        );
    }

    #[test]
    fn test_daily_today_or_tomorrow() {
        let task = task_with(ScheduleType::Daily, json!({"time": "02:00:00"}));

        let next = calculate_next_run_time(&task, utc("2026-06-01T01:59:59Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-01T02:00:00Z")));

        let next = calculate_next_run_time(&task, utc("2026-06-01T02:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-02T02:00:00Z")));
    }

    #[test]
    fn test_weekly_wraps_to_next_week() {
        // 2026-06-01 is a Monday
        let task = task_with(
            ScheduleType::Weekly,
            json!({"day_of_week": 0, "time": "02:00:00"}),
        );

        // Monday before 02:00: today
        let next = calculate_next_run_time(&task, utc("2026-06-01T01:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-01T02:00:00Z")));

        // Monday at 02:00 exactly: next Monday
        let next = calculate_next_run_time(&task, utc("2026-06-01T02:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-08T02:00:00Z")));

        // Wednesday targeting Monday: next Monday
        let next = calculate_next_run_time(&task, utc("2026-06-03T12:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-08T02:00:00Z")));
    }

    #[test]
    fn test_monthly_day_31_clamps_to_february_end() {
        let mut task = task_with(
            ScheduleType::Monthly,
            json!({"day_of_month": 31, "time": "02:00"}),
        );
        task.last_success_time = Some(utc("2026-01-01T02:00:00Z"));

        // January 15: this month's 31st
        let next = calculate_next_run_time(&task, utc("2026-01-15T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-01-31T02:00:00Z")));

        // after the January run: February 28 (2026 is not a leap year)
        let next = calculate_next_run_time(&task, utc("2026-01-31T02:00:01Z")).unwrap();
        assert_eq!(next, Some(utc("2026-02-28T02:00:00Z")));

        // leap year February keeps the 29th
        let next = calculate_next_run_time(&task, utc("2028-02-01T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2028-02-29T02:00:00Z")));
    }

    #[test]
    fn test_monthly_never_succeeded_fires_promptly() {
        let task = task_with(
            ScheduleType::Monthly,
            json!({"day_of_month": 1, "time": "02:00:00"}),
        );
        let now = utc("2026-06-15T10:00:00Z");
        let next = calculate_next_run_time(&task, now).unwrap();
        assert_eq!(next, Some(now + Duration::minutes(1)));
    }

    #[test]
    fn test_yearly_feb_29_falls_back_in_non_leap_years() {
        let task = task_with(
            ScheduleType::Yearly,
            json!({"month": 2, "day": 29, "time": "02:00:00"}),
        );

        // 2026 is not a leap year: Feb 28
        let next = calculate_next_run_time(&task, utc("2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-02-28T02:00:00Z")));

        // already past this year's date: 2027 is also not a leap year
        let next = calculate_next_run_time(&task, utc("2026-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2027-02-28T02:00:00Z")));

        // 2028 is a leap year: the 29th holds
        let next = calculate_next_run_time(&task, utc("2027-12-31T00:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2028-02-29T02:00:00Z")));
    }

    #[test]
    fn test_cron_five_and_six_field() {
        let task = task_with(ScheduleType::Cron, json!({"cron": "0 2 * * *"}));
        let next = calculate_next_run_time(&task, utc("2026-06-01T01:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-06-01T02:00:00Z")));

        let task = task_with(ScheduleType::Cron, json!({"cron": "30 0 2 1 * *"}));
        let next = calculate_next_run_time(&task, utc("2026-06-01T03:00:00Z")).unwrap();
        assert_eq!(next, Some(utc("2026-07-01T02:00:30Z")));
    }

    #[test]
    fn test_validate_rejects_malformed_configs() {
        assert!(validate_schedule_config(ScheduleType::Once, &json!({})).is_err());
        assert!(validate_schedule_config(
            ScheduleType::Once,
            &json!({"datetime": "not a date"})
        )
        .is_err());
        assert!(validate_schedule_config(
            ScheduleType::Interval,
            &json!({"interval": -5})
        )
        .is_err());
        assert!(validate_schedule_config(
            ScheduleType::Weekly,
            &json!({"day_of_week": 9})
        )
        .is_err());
        assert!(validate_schedule_config(
            ScheduleType::Monthly,
            &json!({"day_of_month": 0})
        )
        .is_err());
        assert!(
            validate_schedule_config(ScheduleType::Cron, &json!({"cron": "not cron"})).is_err()
        );
    }

    #[test]
    fn test_validate_accepts_well_formed_configs() {
        assert!(validate_schedule_config(
            ScheduleType::Once,
            &json!({"datetime": "2026-12-25 14:30:00"})
        )
        .is_ok());
        assert!(validate_schedule_config(
            ScheduleType::Interval,
            &json!({"interval": 30, "unit": "hours"})
        )
        .is_ok());
        assert!(validate_schedule_config(ScheduleType::Daily, &json!({"time": "23:30"})).is_ok());
        assert!(validate_schedule_config(
            ScheduleType::Monthly,
            &json!({"day_of_month": 31, "time": "02:00"})
        )
        .is_ok());
        assert!(
            validate_schedule_config(ScheduleType::Cron, &json!({"cron": "0 2 * * *"})).is_ok()
        );
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(normalize_cron("15 0 2 * * *"), "15 0 2 * * *");
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 11), 30);
        assert_eq!(days_in_month(2026, 12), 31);
    }
}
