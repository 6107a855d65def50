//! Wiring between discovery, the request client and whatever renders results.
//!
//! Requests run on spawned tasks against a snapshot of the client, and every
//! outcome comes back as a [`ConsoleEvent`] on one channel. The owner feeds
//! those events back through [`Console::apply`] so in-flight flags are only
//! ever touched from the owning loop.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::discovery::DiscoveryEvent;
use crate::error::MISSING_ID_MESSAGE;
use crate::models::ScheduledTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
  TasksReplaced(Vec<ScheduledTask>),
  /// The task list fetch failed.
  RefreshFailed(String),
  /// A run or save request failed before the backend gave a verdict.
  OperationFailed(String),
  RunResult { ok: bool, message: String },
  SaveResult { ok: bool, message: String, creating: bool },
  ServiceUrlChanged(String),
  /// Refused without touching the network, or reported by discovery. Settles
  /// no in-flight state.
  Error(String),
}

pub struct Console {
  client: ApiClient,
  events: mpsc::UnboundedSender<ConsoleEvent>,
  loading: bool,
  /// Runs and saves still waiting for their outcome.
  in_flight: usize,
  pending_refresh: bool,
}

impl Console {
  pub fn new(client: ApiClient, events: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
    Self {
      client,
      events,
      loading: false,
      in_flight: 0,
      pending_refresh: false,
    }
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn is_busy(&self) -> bool {
    self.in_flight > 0 || self.loading
  }

  pub fn has_pending_refresh(&self) -> bool {
    self.pending_refresh
  }

  pub fn on_discovery(&mut self, event: DiscoveryEvent) {
    match event {
      DiscoveryEvent::ServiceUrlChanged(url) => {
        info!(%url, "Retargeting backend client");
        self.client.set_base_url(url.clone());
        self.emit(ConsoleEvent::ServiceUrlChanged(url));
        if self.pending_refresh {
          self.pending_refresh = false;
          self.refresh();
        }
      }
      DiscoveryEvent::Error(message) => self.emit(ConsoleEvent::Error(message)),
    }
  }

  /// Starts a task list fetch. Skipped while one is in flight; deferred until
  /// discovery when no backend is known yet.
  pub fn refresh(&mut self) -> bool {
    if self.loading {
      debug!("Refresh already in flight");
      return false;
    }
    if self.client.base_url().is_none() {
      self.pending_refresh = true;
      return false;
    }

    self.loading = true;
    let client = self.client.clone();
    let events = self.events.clone();
    tokio::spawn(async move {
      let event = match client.fetch_tasks().await {
        Ok(tasks) => ConsoleEvent::TasksReplaced(tasks),
        Err(e) => ConsoleEvent::RefreshFailed(e.to_string()),
      };
      let _ = events.send(event);
    });
    true
  }

  pub fn run_now(&mut self, task: &ScheduledTask) {
    if !task.enabled {
      self.emit(ConsoleEvent::Error("Task is disabled".into()));
      return;
    }
    let Some(id) = task.id else {
      self.emit(ConsoleEvent::Error(MISSING_ID_MESSAGE.into()));
      return;
    };

    self.in_flight += 1;
    let client = self.client.clone();
    let events = self.events.clone();
    tokio::spawn(async move {
      let event = match client.request_run(id).await {
        Ok(outcome) => ConsoleEvent::RunResult { ok: outcome.success, message: outcome.message },
        Err(e) => ConsoleEvent::OperationFailed(e.to_string()),
      };
      let _ = events.send(event);
    });
  }

  /// Validates locally, then creates or updates depending on whether the task
  /// already has an id. A task without a next run is scheduled for now.
  pub fn save(&mut self, mut task: ScheduledTask) {
    if let Err(message) = task.validate() {
      self.emit(ConsoleEvent::Error(message));
      return;
    }
    if task.next_execution.is_none() {
      task.next_execution = Some(Utc::now());
    }

    self.in_flight += 1;
    let client = self.client.clone();
    let events = self.events.clone();
    tokio::spawn(async move {
      let event = match client.save_task(&task).await {
        Ok(outcome) => ConsoleEvent::SaveResult {
          ok: outcome.ok,
          message: outcome.message,
          creating: outcome.creating,
        },
        Err(e) => ConsoleEvent::OperationFailed(e.to_string()),
      };
      let _ = events.send(event);
    });
  }

  /// Settles in-flight state for a received event and chains the follow-up
  /// refresh after successful runs and saves.
  pub fn apply(&mut self, event: &ConsoleEvent) {
    match event {
      ConsoleEvent::TasksReplaced(_) | ConsoleEvent::RefreshFailed(_) => {
        self.loading = false;
      }
      ConsoleEvent::OperationFailed(_) => {
        self.in_flight = self.in_flight.saturating_sub(1);
      }
      ConsoleEvent::RunResult { .. } => {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.refresh();
      }
      ConsoleEvent::SaveResult { ok, .. } => {
        self.in_flight = self.in_flight.saturating_sub(1);
        if *ok {
          self.refresh();
        }
      }
      ConsoleEvent::ServiceUrlChanged(_) | ConsoleEvent::Error(_) => {}
    }
  }

  fn emit(&self, event: ConsoleEvent) {
    if self.events.send(event).is_err() {
      debug!("Console event receiver dropped");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  const UNREACHABLE: &str = "http://127.0.0.1:9/";

  fn console() -> (Console, mpsc::UnboundedReceiver<ConsoleEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Console::new(ApiClient::new(Duration::from_secs(1)), tx), rx)
  }

  /// A console pointed at a backend, with the retarget event already consumed.
  async fn targeted() -> (Console, mpsc::UnboundedReceiver<ConsoleEvent>) {
    let (mut console, mut rx) = console();
    console.on_discovery(DiscoveryEvent::ServiceUrlChanged(UNREACHABLE.into()));
    assert_eq!(rx.recv().await, Some(ConsoleEvent::ServiceUrlChanged(UNREACHABLE.into())));
    (console, rx)
  }

  fn runnable() -> ScheduledTask {
    ScheduledTask {
      id: Some(7),
      name: "report".into(),
      cron_schedule: "* * * * * *".into(),
      action_name: "console".into(),
      action_function: "run".into(),
      action_configuration: "{}".into(),
      timeout: 1000,
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn refresh_waits_for_discovery() {
    let (mut console, mut rx) = console();
    assert!(!console.refresh());
    assert!(console.has_pending_refresh());
    assert!(!console.is_loading());

    console.on_discovery(DiscoveryEvent::ServiceUrlChanged(UNREACHABLE.into()));
    assert_eq!(console.client().base_url(), Some(UNREACHABLE));
    assert!(!console.has_pending_refresh());
    assert!(console.is_loading());
    assert_eq!(rx.recv().await, Some(ConsoleEvent::ServiceUrlChanged(UNREACHABLE.into())));
  }

  #[tokio::test]
  async fn run_now_refuses_disabled_or_unsaved_tasks() {
    let (mut console, mut rx) = console();

    console.run_now(&ScheduledTask { enabled: false, ..runnable() });
    assert_eq!(rx.recv().await, Some(ConsoleEvent::Error("Task is disabled".into())));

    console.run_now(&ScheduledTask { id: None, ..runnable() });
    assert_eq!(rx.recv().await, Some(ConsoleEvent::Error("Task is missing an ID".into())));
    assert!(!console.is_busy());
  }

  #[tokio::test]
  async fn refusal_keeps_refresh_in_flight() {
    let (mut console, mut rx) = targeted().await;
    assert!(console.refresh());

    // Sent synchronously, so it is queued ahead of the fetch outcome.
    console.run_now(&ScheduledTask { enabled: false, ..runnable() });
    let event = rx.recv().await.unwrap();
    assert_eq!(event, ConsoleEvent::Error("Task is disabled".into()));
    console.apply(&event);

    assert!(console.is_loading());
    assert!(!console.refresh());
  }

  #[tokio::test]
  async fn discovery_error_keeps_refresh_in_flight() {
    let (mut console, mut rx) = targeted().await;
    assert!(console.refresh());

    console.on_discovery(DiscoveryEvent::Error("boom".into()));
    let event = rx.recv().await.unwrap();
    assert_eq!(event, ConsoleEvent::Error("boom".into()));
    console.apply(&event);

    assert!(console.is_loading());
    assert!(!console.refresh());
  }

  #[tokio::test]
  async fn failed_run_does_not_settle_refresh() {
    let (mut console, _rx) = targeted().await;
    assert!(console.refresh());
    console.run_now(&runnable());

    console.apply(&ConsoleEvent::OperationFailed("connection refused".into()));
    assert!(console.is_loading());
    assert!(console.is_busy());

    console.apply(&ConsoleEvent::RefreshFailed("connection refused".into()));
    assert!(!console.is_busy());
    assert!(console.refresh());
  }

  #[tokio::test]
  async fn run_without_backend_reports_no_service() {
    let (mut console, mut rx) = console();
    console.run_now(&runnable());
    assert!(console.is_busy());

    let event = rx.recv().await.unwrap();
    assert_eq!(event, ConsoleEvent::OperationFailed("No service discovered".into()));
    console.apply(&event);
    assert!(!console.is_busy());
  }

  #[tokio::test]
  async fn invalid_task_is_not_sent() {
    let (mut console, mut rx) = console();
    console.save(ScheduledTask { id: None, timeout: 0, ..runnable() });
    assert_eq!(rx.recv().await, Some(ConsoleEvent::Error("Timeout must be > 0".into())));
    assert!(!console.is_busy());
  }

  #[tokio::test]
  async fn discovery_errors_surface_as_errors() {
    let (mut console, mut rx) = console();
    console.on_discovery(DiscoveryEvent::Error("Failed to bind gossip socket: in use".into()));
    assert_eq!(
      rx.recv().await,
      Some(ConsoleEvent::Error("Failed to bind gossip socket: in use".into()))
    );
  }
}
