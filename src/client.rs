use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConsoleError, ConsoleResult, UNPARSABLE_TASK_LIST_MESSAGE};
use crate::models::{ScheduledTask, TaskResponse};

/// Result of a create or update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
  pub ok: bool,
  pub message: String,
  pub creating: bool,
}

/// The shapes a backend response body can take.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
  TaskList(Vec<Value>),
  /// `{"success": bool, "message": string}`
  Outcome(TaskResponse),
  /// An object carrying a non-empty `message` and nothing else we recognise.
  Message(String),
  Unrecognized,
  Malformed,
}

impl ResponseBody {
  pub fn classify(body: &[u8]) -> Self {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
      return ResponseBody::Malformed;
    };
    match value {
      Value::Array(items) => ResponseBody::TaskList(items),
      Value::Object(obj) => {
        let message = obj
          .get("message")
          .and_then(Value::as_str)
          .filter(|m| !m.is_empty())
          .map(String::from);
        match serde_json::from_value::<TaskResponse>(Value::Object(obj)) {
          Ok(outcome) => ResponseBody::Outcome(outcome),
          Err(_) => message.map(ResponseBody::Message).unwrap_or(ResponseBody::Unrecognized),
        }
      }
      _ => ResponseBody::Unrecognized,
    }
  }
}

/// HTTP client for the scheduling backend.
///
/// Cloning snapshots the base URL: a request started on a clone keeps talking to
/// the URL it started with even if the original is later retargeted.
#[derive(Debug, Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Option<String>,
}

impl ApiClient {
  pub fn new(timeout: Duration) -> Self {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to default HTTP client");
        reqwest::Client::new()
      });
    Self::with_client(http)
  }

  pub fn with_client(http: reqwest::Client) -> Self {
    Self { http, base_url: None }
  }

  /// An empty URL clears the target.
  pub fn set_base_url(&mut self, url: impl Into<String>) {
    let url = url.into();
    self.base_url = if url.trim().is_empty() { None } else { Some(url) };
  }

  pub fn base_url(&self) -> Option<&str> {
    self.base_url.as_deref()
  }

  pub fn build_url(&self, path: &str) -> ConsoleResult<String> {
    let base = self.base_url.as_deref().ok_or(ConsoleError::NoBackend)?;
    Ok(format!(
      "{}/{}",
      base.trim_end_matches('/'),
      path.trim_start_matches('/')
    ))
  }

  /// Fetches the full task list, skipping array entries that are not objects.
  pub async fn fetch_tasks(&self) -> ConsoleResult<Vec<ScheduledTask>> {
    let url = self.build_url("tasks")?;
    debug!(%url, "Fetching tasks");
    let body = self.send(self.http.get(&url)).await?;

    match ResponseBody::classify(&body) {
      ResponseBody::TaskList(items) => Ok(items.iter().filter_map(ScheduledTask::from_value).collect()),
      ResponseBody::Malformed => Err(ConsoleError::UnexpectedResponse(UNPARSABLE_TASK_LIST_MESSAGE.into())),
      ResponseBody::Outcome(TaskResponse { message, .. }) | ResponseBody::Message(message)
        if !message.is_empty() =>
      {
        Err(ConsoleError::Service(message))
      }
      _ => Err(ConsoleError::unexpected_response()),
    }
  }

  pub async fn request_run(&self, task_id: i64) -> ConsoleResult<TaskResponse> {
    let url = self.build_url(&format!("tasks/{}/request_run", task_id))?;
    debug!(%url, task_id, "Requesting immediate run");
    let request = self.http.post(&url).header(CONTENT_TYPE, "application/json");
    let body = self.send(request).await?;
    expect_outcome(&body)
  }

  pub async fn create_task(&self, task: &ScheduledTask) -> ConsoleResult<SaveOutcome> {
    let url = self.build_url("tasks")?;
    debug!(%url, name = %task.name, "Creating task");
    let body = self.send(self.http.post(&url).json(&task.to_json())).await?;
    let outcome = expect_outcome(&body)?;
    Ok(SaveOutcome { ok: outcome.success, message: outcome.message, creating: true })
  }

  pub async fn update_task(&self, task: &ScheduledTask) -> ConsoleResult<SaveOutcome> {
    // Backend check first so every call reports a missing backend the same way.
    self.build_url("tasks")?;
    let id = task.id.ok_or(ConsoleError::MissingId)?;
    let url = self.build_url(&format!("tasks/{}", id))?;
    debug!(%url, task_id = id, "Updating task");
    let body = self.send(self.http.patch(&url).json(&task.to_json())).await?;
    let outcome = expect_outcome(&body)?;
    Ok(SaveOutcome { ok: outcome.success, message: outcome.message, creating: false })
  }

  /// Creates tasks without an id, updates the rest.
  pub async fn save_task(&self, task: &ScheduledTask) -> ConsoleResult<SaveOutcome> {
    match task.id {
      None => self.create_task(task).await,
      Some(_) => self.update_task(task).await,
    }
  }

  async fn send(&self, request: RequestBuilder) -> ConsoleResult<Vec<u8>> {
    let response = request.send().await.map_err(|e| {
      warn!(error = %e, "Request to backend failed");
      ConsoleError::Transport(extract_error(&[], &e.to_string()))
    })?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| ConsoleError::Transport(e.to_string()))?
      .to_vec();

    if !status.is_success() {
      let message = extract_error(&body, &format!("HTTP {}", status));
      warn!(%status, %message, "Backend returned an error status");
      return Err(ConsoleError::Transport(message));
    }
    Ok(body)
  }
}

fn expect_outcome(body: &[u8]) -> ConsoleResult<TaskResponse> {
  match ResponseBody::classify(body) {
    ResponseBody::Outcome(outcome) => Ok(outcome),
    _ => Err(ConsoleError::unexpected_response()),
  }
}

/// Best human-readable text for a failed request: the JSON `message`, then the
/// trimmed body, then the transport's own description.
pub fn extract_error(body: &[u8], fallback: &str) -> String {
  if let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(body) {
    if let Some(message) = obj.get("message").and_then(Value::as_str).filter(|m| !m.is_empty()) {
      return message.to_string();
    }
  }
  let raw = String::from_utf8_lossy(body);
  let raw = raw.trim();
  if !raw.is_empty() {
    return raw.to_string();
  }
  fallback.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn client_at(base: &str) -> ApiClient {
    let mut client = ApiClient::new(Duration::from_secs(1));
    client.set_base_url(base);
    client
  }

  #[test]
  fn url_building_is_slash_insensitive() {
    let a = client_at("http://h:1/base").build_url("/tasks").unwrap();
    let b = client_at("http://h:1/base/").build_url("tasks").unwrap();
    assert_eq!(a, "http://h:1/base/tasks");
    assert_eq!(a, b);
    assert_eq!(client_at("http://h:1/").build_url("tasks/3/request_run").unwrap(), "http://h:1/tasks/3/request_run");
  }

  #[test]
  fn no_base_url_means_no_backend() {
    let client = ApiClient::new(Duration::from_secs(1));
    assert_eq!(client.build_url("tasks"), Err(ConsoleError::NoBackend));

    let cleared = client_at("  ");
    assert_eq!(cleared.base_url(), None);
  }

  #[test]
  fn classify_recognises_each_shape() {
    assert_eq!(ResponseBody::classify(b"[]"), ResponseBody::TaskList(vec![]));
    assert_eq!(
      ResponseBody::classify(br#"{"success":true,"message":"done"}"#),
      ResponseBody::Outcome(TaskResponse { success: true, message: "done".into() })
    );
    assert_eq!(
      ResponseBody::classify(br#"{"message":"maintenance"}"#),
      ResponseBody::Message("maintenance".into())
    );
    assert_eq!(ResponseBody::classify(b"{}"), ResponseBody::Unrecognized);
    assert_eq!(ResponseBody::classify(br#"{"success":"yes","message":"m"}"#), ResponseBody::Message("m".into()));
    assert_eq!(ResponseBody::classify(b"42"), ResponseBody::Unrecognized);
    assert_eq!(ResponseBody::classify(b"<html>"), ResponseBody::Malformed);
  }

  #[test]
  fn outcome_requires_both_fields() {
    assert_eq!(expect_outcome(br#"{"success":true}"#), Err(ConsoleError::unexpected_response()));
    assert_eq!(expect_outcome(br#"{"message":"x"}"#), Err(ConsoleError::unexpected_response()));
    assert_eq!(
      expect_outcome(br#"{"success":false,"message":"x","extra":1}"#),
      Ok(TaskResponse { success: false, message: "x".into() })
    );
  }

  #[test]
  fn error_extraction_chain() {
    let body = serde_json::to_vec(&json!({ "message": "task not found" })).unwrap();
    assert_eq!(extract_error(&body, "HTTP 404 Not Found"), "task not found");
    assert_eq!(extract_error(br#"{"message":""}"#, "fallback"), r#"{"message":""}"#);
    assert_eq!(extract_error(b"  bad gateway \n", "fallback"), "bad gateway");
    assert_eq!(extract_error(b"   ", "connection refused"), "connection refused");
    assert_eq!(extract_error(&[], "connection refused"), "connection refused");
  }
}
