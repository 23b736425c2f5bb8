use std::fmt::Write as _;

use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Timelike, Utc,
};
use rhai::{Engine, EvalAltResult, INT};

use super::runtime_error;

/// Date/time utility bound as `$t` in templates and `DateTime` in scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeUtil;

/// A UTC instant handed to templates and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTimeValue(pub DateTime<Utc>);

impl DateTimeUtil {
    pub fn now(&self) -> DateTimeValue {
        DateTimeValue(Utc::now())
    }

    pub fn from_iso(&self, text: &str) -> Result<DateTimeValue, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(DateTimeValue(parsed.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(DateTimeValue(naive.and_utc()));
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| DateTimeValue(naive.and_utc()))
            .ok_or_else(|| format!("Invalid ISO date-time \"{}\".", text))
    }

    pub fn from_millis(&self, millis: i64) -> Result<DateTimeValue, String> {
        DateTime::from_timestamp_millis(millis)
            .map(DateTimeValue)
            .ok_or_else(|| format!("Timestamp {} is out of range.", millis))
    }

    pub fn from_format(&self, text: &str, format: &str) -> Result<DateTimeValue, String> {
        if let Ok(parsed) = DateTime::parse_from_str(text, format) {
            return Ok(DateTimeValue(parsed.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(DateTimeValue(naive.and_utc()));
        }
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| DateTimeValue(naive.and_utc()))
            .ok_or_else(|| format!("\"{}\" does not match format \"{}\".", text, format))
    }
}

impl DateTimeValue {
    pub fn to_iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn to_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn to_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// strftime-style formatting; unknown specifiers are an error instead of a panic.
    pub fn format(&self, format: &str) -> Result<String, String> {
        let mut out = String::new();
        write!(out, "{}", self.0.format(format))
            .map_err(|_| format!("Invalid date-time format \"{}\".", format))?;
        Ok(out)
    }

    pub fn shift(&self, delta: Option<TimeDelta>) -> Result<DateTimeValue, String> {
        delta
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(DateTimeValue)
            .ok_or_else(|| "Date-time arithmetic overflowed.".to_string())
    }

    pub fn start_of_day(&self) -> DateTimeValue {
        let midnight = self
            .0
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(self.0);
        DateTimeValue(midnight)
    }
}

type DeltaFn = fn(i64) -> Option<TimeDelta>;

const UNITS: &[(&str, DeltaFn)] = &[
    ("days", TimeDelta::try_days),
    ("hours", TimeDelta::try_hours),
    ("minutes", TimeDelta::try_minutes),
    ("seconds", TimeDelta::try_seconds),
    ("millis", TimeDelta::try_milliseconds),
];

fn negate(amount: INT) -> Option<INT> {
    amount.checked_neg()
}

pub(crate) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<DateTimeUtil>("DateTimeUtil")
        .register_fn("now", |util: &mut DateTimeUtil| util.now())
        .register_fn(
            "from_iso",
            |util: &mut DateTimeUtil, text: &str| -> Result<DateTimeValue, Box<EvalAltResult>> {
                util.from_iso(text).map_err(runtime_error)
            },
        )
        .register_fn(
            "from_millis",
            |util: &mut DateTimeUtil, millis: INT| -> Result<DateTimeValue, Box<EvalAltResult>> {
                util.from_millis(millis).map_err(runtime_error)
            },
        )
        .register_fn(
            "from_format",
            |util: &mut DateTimeUtil,
             text: &str,
             format: &str|
             -> Result<DateTimeValue, Box<EvalAltResult>> {
                util.from_format(text, format).map_err(runtime_error)
            },
        );

    engine
        .register_type_with_name::<DateTimeValue>("DateTimeValue")
        .register_fn("to_iso", |value: &mut DateTimeValue| value.to_iso())
        .register_fn("to_string", |value: &mut DateTimeValue| value.to_iso())
        .register_fn("to_debug", |value: &mut DateTimeValue| {
            format!("DateTime({})", value.to_iso())
        })
        .register_fn("to_millis", |value: &mut DateTimeValue| value.to_millis())
        .register_fn("to_seconds", |value: &mut DateTimeValue| value.to_seconds())
        .register_fn(
            "format",
            |value: &mut DateTimeValue, format: &str| -> Result<String, Box<EvalAltResult>> {
                value.format(format).map_err(runtime_error)
            },
        )
        .register_fn("start_of_day", |value: &mut DateTimeValue| {
            value.start_of_day()
        })
        .register_fn("==", |left: DateTimeValue, right: DateTimeValue| left == right)
        .register_fn("!=", |left: DateTimeValue, right: DateTimeValue| left != right)
        .register_fn("<", |left: DateTimeValue, right: DateTimeValue| left < right)
        .register_fn(">", |left: DateTimeValue, right: DateTimeValue| left > right)
        .register_get("year", |value: &mut DateTimeValue| value.0.year() as INT)
        .register_get("month", |value: &mut DateTimeValue| value.0.month() as INT)
        .register_get("day", |value: &mut DateTimeValue| value.0.day() as INT)
        .register_get("hour", |value: &mut DateTimeValue| value.0.hour() as INT)
        .register_get("minute", |value: &mut DateTimeValue| value.0.minute() as INT)
        .register_get("second", |value: &mut DateTimeValue| value.0.second() as INT)
        .register_get("weekday", |value: &mut DateTimeValue| {
            value.0.weekday().number_from_monday() as INT
        });

    for (unit, delta) in UNITS {
        let delta = *delta;
        engine.register_fn(
            format!("plus_{}", unit),
            move |value: &mut DateTimeValue,
                  amount: INT|
                  -> Result<DateTimeValue, Box<EvalAltResult>> {
                value.shift(delta(amount)).map_err(runtime_error)
            },
        );
        engine.register_fn(
            format!("minus_{}", unit),
            move |value: &mut DateTimeValue,
                  amount: INT|
                  -> Result<DateTimeValue, Box<EvalAltResult>> {
                value.shift(negate(amount).and_then(delta)).map_err(runtime_error)
            },
        );
    }
}
