use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Accepted wall-clock layouts, fractional seconds first.
const TIMESTAMP_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
];

/// A schedulable unit of work as the backend exposes it.
///
/// `id` is `None` until the backend assigns one; the console never invents or
/// rewrites it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
  pub id: Option<i64>,
  pub name: String,
  pub cron_schedule: String,
  pub action_name: String,
  pub action_function: String,
  pub action_configuration: String,
  /// Milliseconds.
  pub timeout: i64,
  pub next_execution: Option<DateTime<Utc>>,
  pub enabled: bool,
  pub immediate: bool,
  pub blackout_start: Option<DateTime<Utc>>,
  pub blackout_end: Option<DateTime<Utc>>,
}

impl Default for ScheduledTask {
  fn default() -> Self {
    Self {
      id: None,
      name: String::new(),
      cron_schedule: String::new(),
      action_name: String::new(),
      action_function: String::new(),
      action_configuration: String::new(),
      timeout: 0,
      next_execution: None,
      enabled: true,
      immediate: false,
      blackout_start: None,
      blackout_end: None,
    }
  }
}

impl ScheduledTask {
  /// Decodes any JSON value, yielding `None` for non-objects.
  pub fn from_value(value: &Value) -> Option<Self> {
    value.as_object().map(Self::from_json)
  }

  pub fn from_json(obj: &Map<String, Value>) -> Self {
    let text = |key: &str| {
      obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
    };

    Self {
      id: obj.get("id").and_then(coerce_i64),
      name: text("name"),
      cron_schedule: text("cron_schedule"),
      action_name: text("action_name"),
      action_function: text("action_function"),
      action_configuration: text("action_configuration"),
      timeout: obj.get("timeout").and_then(coerce_i64).unwrap_or(0),
      next_execution: obj.get("next_execution").and_then(parse_optional_timestamp),
      enabled: obj.get("enabled").and_then(Value::as_bool).unwrap_or(true),
      immediate: obj.get("immediate").and_then(Value::as_bool).unwrap_or(false),
      blackout_start: obj.get("blackout_start").and_then(parse_optional_timestamp),
      blackout_end: obj.get("blackout_end").and_then(parse_optional_timestamp),
    }
  }

  /// Every key is always present; absent values go out as `null`.
  pub fn to_json(&self) -> Value {
    json!({
      "id": self.id,
      "name": self.name,
      "cron_schedule": self.cron_schedule,
      "action_name": self.action_name,
      "action_function": self.action_function,
      "action_configuration": self.action_configuration,
      "timeout": self.timeout,
      "next_execution": timestamp_or_null(self.next_execution),
      "enabled": self.enabled,
      "immediate": self.immediate,
      "blackout_start": timestamp_or_null(self.blackout_start),
      "blackout_end": timestamp_or_null(self.blackout_end),
    })
  }

  pub fn validate(&self) -> Result<(), String> {
    let required = [
      (&self.name, "Name is required"),
      (&self.cron_schedule, "Cron is required"),
      (&self.action_name, "Action name is required"),
      (&self.action_function, "Action function is required"),
      (&self.action_configuration, "Action configuration is required"),
    ];
    for (value, message) in required {
      if value.trim().is_empty() {
        return Err(message.into());
      }
    }
    if self.timeout <= 0 {
      return Err("Timeout must be > 0".into());
    }
    Ok(())
  }
}

/// `{success, message}` envelope returned by mutating endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
  pub success: bool,
  pub message: String,
}

fn coerce_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

pub fn parse_optional_timestamp(value: &Value) -> Option<DateTime<Utc>> {
  value.as_str().and_then(parse_timestamp)
}

/// Parses an ISO-8601 timestamp and declares its wall-clock value UTC.
///
/// Any zone designator is dropped, not applied. Unparsable input is `None`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
  let text = text.trim();
  if text.is_empty() {
    return None;
  }
  let wall_clock = strip_zone_designator(text);
  TIMESTAMP_FORMATS
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(wall_clock, format).ok())
    .or_else(|| {
      NaiveDate::parse_from_str(wall_clock, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
    .map(|naive| naive.and_utc())
}

/// Drops a trailing `Z`, `±HH:MM` or `±HHMM`. Offsets are only looked for in
/// the time part so the dashes of a bare date survive.
fn strip_zone_designator(text: &str) -> &str {
  if let Some(rest) = text.strip_suffix(['Z', 'z']) {
    return rest;
  }
  let Some(time_start) = text.find(['T', 't']) else {
    return text;
  };
  match text[time_start..].rfind(['+', '-']) {
    Some(sign) if is_utc_offset(&text[time_start + sign + 1..]) => &text[..time_start + sign],
    _ => text,
  }
}

fn is_utc_offset(offset: &str) -> bool {
  match offset.as_bytes() {
    [h1, h2, b':', m1, m2] | [h1, h2, m1, m2] => [h1, h2, m1, m2].iter().all(|b| b.is_ascii_digit()),
    _ => false,
  }
}

pub fn format_wire_timestamp(value: &DateTime<Utc>) -> String {
  value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn timestamp_or_null(value: Option<DateTime<Utc>>) -> Value {
  value
    .map(|dt| Value::String(format_wire_timestamp(&dt)))
    .unwrap_or(Value::Null)
}

pub fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
  match value {
    Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    None => "-".into(),
  }
}
