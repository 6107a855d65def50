use std::env;
use std::time::Duration;

pub const DEFAULT_GOSSIP_BIND: &str = "127.0.0.1";
pub const DEFAULT_GOSSIP_PORT: u16 = 5504;
/// Used when `RUNINATOR_GOSSIP_PORT` is set to something that is not a port number.
pub const FALLBACK_GOSSIP_PORT: u16 = 5000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REFRESH_SECS: u64 = 10;
pub const DEFAULT_STATUS_CLEAR_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub gossip_bind: String,
  pub gossip_port: u16,
  pub http_timeout: Duration,
  pub refresh_interval: Duration,
  pub status_clear_delay: Duration,
}

impl Config {
  pub fn from_env() -> Self {
    Self::from_vars(
      env::var("RUNINATOR_GOSSIP_BIND").ok(),
      env::var("RUNINATOR_GOSSIP_PORT").ok(),
      env::var("COMMAND_CENTER_HTTP_TIMEOUT_SECS").ok(),
      env::var("COMMAND_CENTER_REFRESH_SECS").ok(),
      env::var("COMMAND_CENTER_STATUS_CLEAR_SECS").ok(),
    )
  }

  pub fn from_vars(
    gossip_bind: Option<String>,
    gossip_port: Option<String>,
    http_timeout: Option<String>,
    refresh: Option<String>,
    status_clear: Option<String>,
  ) -> Self {
    Self {
      gossip_bind: resolve_bind(gossip_bind),
      gossip_port: resolve_port(gossip_port.as_deref()),
      http_timeout: resolve_secs(http_timeout.as_deref(), DEFAULT_HTTP_TIMEOUT_SECS),
      refresh_interval: resolve_secs(refresh.as_deref(), DEFAULT_REFRESH_SECS),
      status_clear_delay: resolve_secs(status_clear.as_deref(), DEFAULT_STATUS_CLEAR_SECS),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::from_vars(None, None, None, None, None)
  }
}

fn resolve_bind(value: Option<String>) -> String {
  match value {
    Some(bind) if !bind.trim().is_empty() => bind.trim().to_string(),
    _ => DEFAULT_GOSSIP_BIND.into(),
  }
}

// Unset and blank are the same case; garbage gets a different port.
fn resolve_port(value: Option<&str>) -> u16 {
  let raw = value.map(str::trim).unwrap_or("");
  if raw.is_empty() {
    return DEFAULT_GOSSIP_PORT;
  }
  raw.parse().unwrap_or(FALLBACK_GOSSIP_PORT)
}

fn resolve_secs(value: Option<&str>, default: u64) -> Duration {
  let secs = value
    .and_then(|v| v.trim().parse::<u64>().ok())
    .filter(|secs| *secs > 0)
    .unwrap_or(default);
  Duration::from_secs(secs)
}
