//! Passive discovery of the scheduling backend.
//!
//! Backends broadcast `web_service` announcements over UDP. The listener keeps the
//! latest announcement per service id and publishes the base URL of whichever one
//! carries the freshest heartbeat.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConsoleError, ConsoleResult};
use crate::models::parse_optional_timestamp;

const BUFFER_SIZE: usize = 65_536;
const ANNOUNCEMENT_TYPE: &str = "web_service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAnnouncement {
  pub service_id: String,
  pub address: String,
  pub port: u16,
  pub base_path: Option<String>,
  pub last_heartbeat: DateTime<Utc>,
}

impl ServiceAnnouncement {
  /// `http://address:port[/base_path]/`, always with a trailing slash.
  pub fn base_url(&self) -> String {
    let mut url = format!("http://{}:{}", self.address, self.port);
    if let Some(path) = self.base_path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
      if !path.starts_with('/') {
        url.push('/');
      }
      url.push_str(path);
    }
    if !url.ends_with('/') {
      url.push('/');
    }
    url
  }
}

/// Decodes one gossip datagram. Anything that is not a well-formed
/// `web_service` announcement yields `None`.
pub fn decode_announcement(datagram: &[u8], sender: IpAddr, now: DateTime<Utc>) -> Option<ServiceAnnouncement> {
  let root: Value = serde_json::from_slice(datagram).ok()?;
  let root = root.as_object()?;
  if root.get("type").and_then(Value::as_str) != Some(ANNOUNCEMENT_TYPE) {
    return None;
  }
  let service = root.get("service")?.as_object()?;

  let text = |key: &str| {
    service
      .get(key)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
  };

  let address = text("address").unwrap_or_else(|| sender.to_string());
  let port = service.get("port").and_then(decode_port).unwrap_or(0);
  // Silent senders are keyed by endpoint so they are not merged together.
  let service_id = text("service_id").unwrap_or_else(|| format!("{}:{}", address, port));
  let last_heartbeat = service
    .get("last_heartbeat")
    .and_then(parse_optional_timestamp)
    .unwrap_or(now);

  Some(ServiceAnnouncement {
    service_id,
    address,
    port,
    base_path: text("base_path"),
    last_heartbeat,
  })
}

/// Integral port numbers, including whole floats such as `3001.0`. Fractional
/// floats truncate; anything outside `u16` is rejected.
fn decode_port(value: &Value) -> Option<u16> {
  let port = match value.as_u64() {
    Some(port) => port,
    None => {
      let port = value.as_f64().filter(|p| p.is_finite() && *p >= 0.0)?;
      port.trunc() as u64
    }
  };
  u16::try_from(port).ok()
}

/// Last announcement per service id plus the URL most recently published.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
  services: HashMap<String, ServiceAnnouncement>,
  current_url: Option<String>,
}

impl ServiceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, announcement: ServiceAnnouncement) {
    self.services.insert(announcement.service_id.clone(), announcement);
  }

  /// Decodes and records a datagram; returns whether it was kept.
  pub fn observe(&mut self, datagram: &[u8], sender: IpAddr, now: DateTime<Utc>) -> bool {
    match decode_announcement(datagram, sender, now) {
      Some(announcement) => {
        debug!(
          service_id = %announcement.service_id,
          address = %announcement.address,
          port = announcement.port,
          "Recorded service announcement"
        );
        self.record(announcement);
        true
      }
      None => {
        debug!(%sender, bytes = datagram.len(), "Discarded gossip datagram");
        false
      }
    }
  }

  pub fn get(&self, service_id: &str) -> Option<&ServiceAnnouncement> {
    self.services.get(service_id)
  }

  pub fn len(&self) -> usize {
    self.services.len()
  }

  pub fn is_empty(&self) -> bool {
    self.services.is_empty()
  }

  /// Latest heartbeat wins; equal heartbeats go to the lexically smallest id.
  pub fn freshest(&self) -> Option<&ServiceAnnouncement> {
    self.services.values().max_by(|a, b| {
      a.last_heartbeat
        .cmp(&b.last_heartbeat)
        .then_with(|| b.service_id.cmp(&a.service_id))
    })
  }

  /// Recomputes the active URL. Returns it only when it differs from the
  /// previously published one.
  pub fn refresh_current_url(&mut self) -> Option<String> {
    let url = self.freshest()?.base_url();
    if self.current_url.as_deref() == Some(url.as_str()) {
      return None;
    }
    self.current_url = Some(url.clone());
    Some(url)
  }

  pub fn current_url(&self) -> Option<&str> {
    self.current_url.as_deref()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
  ServiceUrlChanged(String),
  Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
  Unbound,
  Listening,
  /// Bind failed; the component stays inert until the owner replaces it.
  Failed,
}

pub struct GossipDiscovery {
  state: DiscoveryState,
  events: mpsc::UnboundedSender<DiscoveryEvent>,
  publisher: Option<watch::Sender<Option<String>>>,
  current_url: watch::Receiver<Option<String>>,
  local_addr: Option<SocketAddr>,
  listener: Option<JoinHandle<()>>,
}

impl GossipDiscovery {
  pub fn new(events: mpsc::UnboundedSender<DiscoveryEvent>) -> Self {
    let (publisher, current_url) = watch::channel(None);
    Self {
      state: DiscoveryState::Unbound,
      events,
      publisher: Some(publisher),
      current_url,
      local_addr: None,
      listener: None,
    }
  }

  /// Binds the gossip socket and spawns the listener. A bind failure is
  /// reported once on the event channel and leaves the component inert.
  pub async fn start(&mut self, bind_address: &str, port: u16) -> ConsoleResult<()> {
    if self.state != DiscoveryState::Unbound {
      return Ok(());
    }

    let socket = match bind_gossip_socket(bind_address, port).await {
      Ok(socket) => socket,
      Err(e) => {
        error!(bind_address, port, error = %e, "Failed to bind gossip socket");
        self.state = DiscoveryState::Failed;
        let err = ConsoleError::Bind(e.to_string());
        let _ = self.events.send(DiscoveryEvent::Error(err.to_string()));
        return Err(err);
      }
    };

    self.local_addr = socket.local_addr().ok();
    info!(local_addr = ?self.local_addr, "Listening for service gossip");

    let Some(publisher) = self.publisher.take() else {
      return Ok(());
    };
    let events = self.events.clone();
    self.listener = Some(tokio::spawn(listen(socket, ServiceRegistry::new(), publisher, events)));
    self.state = DiscoveryState::Listening;
    Ok(())
  }

  pub fn current_url(&self) -> Option<String> {
    self.current_url.borrow().clone()
  }

  /// A receiver that always holds the last published URL.
  pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
    self.current_url.clone()
  }

  pub fn state(&self) -> DiscoveryState {
    self.state
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }
}

impl Drop for GossipDiscovery {
  fn drop(&mut self) {
    if let Some(listener) = self.listener.take() {
      listener.abort();
    }
  }
}

async fn bind_gossip_socket(bind_address: &str, port: u16) -> std::io::Result<UdpSocket> {
  let host = bind_address
    .trim()
    .parse::<IpAddr>()
    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
  let socket = UdpSocket::bind((host, port)).await?;
  socket.set_broadcast(true)?;
  Ok(socket)
}

async fn listen(
  socket: UdpSocket,
  mut registry: ServiceRegistry,
  publisher: watch::Sender<Option<String>>,
  events: mpsc::UnboundedSender<DiscoveryEvent>,
) {
  let mut buffer = vec![0u8; BUFFER_SIZE];

  loop {
    match socket.recv_from(&mut buffer).await {
      Ok((len, sender)) => {
        registry.observe(&buffer[..len], sender.ip(), Utc::now());
        drain_pending(&socket, &mut buffer, &mut registry);

        if let Some(url) = registry.refresh_current_url() {
          info!(%url, services = registry.len(), "Active service changed");
          publisher.send_replace(Some(url.clone()));
          if events.send(DiscoveryEvent::ServiceUrlChanged(url)).is_err() {
            debug!("No discovery event subscriber");
          }
        }
      }
      Err(e) if e.kind() == ErrorKind::ConnectionReset => {
        debug!("Gossip listener ignored connection reset");
      }
      Err(e) => {
        warn!(error = %e, "Error receiving gossip datagram");
        tokio::time::sleep(Duration::from_secs(1)).await;
      }
    }
  }
}

fn drain_pending(socket: &UdpSocket, buffer: &mut [u8], registry: &mut ServiceRegistry) {
  loop {
    match socket.try_recv_from(buffer) {
      Ok((len, sender)) => {
        registry.observe(&buffer[..len], sender.ip(), Utc::now());
      }
      Err(e) if e.kind() == ErrorKind::WouldBlock => break,
      Err(e) => {
        debug!(error = %e, "Stopped draining gossip socket");
        break;
      }
    }
  }
}
