use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use command_center::{
  client::ApiClient,
  config::Config,
  discovery::{DiscoveryEvent, GossipDiscovery},
  models::format_timestamp,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DISCOVERY_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
  let config = Config::from_env();

  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut discovery = GossipDiscovery::new(tx);
  discovery
    .start(&config.gossip_bind, config.gossip_port)
    .await
    .context("gossip listener did not start")?;
  info!(bind = %config.gossip_bind, port = config.gossip_port, "Waiting for a service announcement");

  let url = tokio::time::timeout(DISCOVERY_WAIT, async {
    while let Some(event) = rx.recv().await {
      match event {
        DiscoveryEvent::ServiceUrlChanged(url) => return Some(url),
        DiscoveryEvent::Error(message) => warn!(%message, "Discovery error"),
      }
    }
    None
  })
  .await
  .map_err(|_| anyhow!("no service announced within {:?}", DISCOVERY_WAIT))?
  .ok_or_else(|| anyhow!("discovery stopped before a service was announced"))?;

  let mut client = ApiClient::new(config.http_timeout);
  client.set_base_url(url.clone());
  let tasks = client.fetch_tasks().await?;
  info!(%url, count = tasks.len(), "Fetched tasks");
  for task in &tasks {
    info!(
      id = ?task.id,
      name = %task.name,
      cron = %task.cron_schedule,
      next_run = %format_timestamp(task.next_execution),
      enabled = task.enabled,
      timeout_ms = task.timeout,
      "Task"
    );
  }
  Ok(())
}
