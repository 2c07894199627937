//! Redis Pub/Sub transport for the backplane: `RedisPublisher` wraps a
//! `ConnectionManager` plus a `publish` call, and `RedisSubscriber` drives a dedicated
//! `redis::Client` through a reconnecting background task over `pubsub.on_message()`,
//! with a `broadcast`-channel shutdown signal.

use super::{BackplanePublisher, InvalidationEvent, WireEnvelope, WIRE_VERSION};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::{BackplaneStats, InvalidationHandler};

/// Publishes invalidation events to a Redis Pub/Sub channel.
pub struct RedisPublisher {
    connection: tokio::sync::Mutex<redis::aio::ConnectionManager>,
    channel: String,
    stats: Arc<BackplaneStats>,
}

impl RedisPublisher {
    pub async fn new(redis_url: &str, channel: impl Into<String>, stats: Arc<BackplaneStats>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("failed to open redis client for backplane")?;
        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to establish backplane connection manager")?;
        Ok(Self { connection: tokio::sync::Mutex::new(connection), channel: channel.into(), stats })
    }
}

#[async_trait::async_trait]
impl BackplanePublisher for RedisPublisher {
    async fn publish(&self, event: InvalidationEvent) -> Result<()> {
        let envelope = WireEnvelope { v: WIRE_VERSION, src: event.source_id, key: event.key, tag: event.tag, items: None };
        self.publish_envelope(envelope).await
    }

    async fn publish_envelope(&self, envelope: WireEnvelope) -> Result<()> {
        let json = envelope.to_json().context("failed to serialize invalidation envelope")?;
        let mut conn = self.connection.lock().await;
        let _: () = conn.publish(&self.channel, &json).await.context("failed to publish invalidation envelope")?;
        self.stats.messages_sent.fetch_add(1, Relaxed);
        Ok(())
    }
}

/// Subscribes to a Redis Pub/Sub channel and dispatches well-formed, non-self-originated
/// invalidations to a handler (echo suppression is performed by the caller, which knows
/// its own `instance_id`; this type only parses and validates the wire envelope).
pub struct RedisSubscriber {
    client: redis::Client,
    channel: String,
    stats: Arc<BackplaneStats>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RedisSubscriber {
    pub fn new(redis_url: &str, channel: impl Into<String>, stats: Arc<BackplaneStats>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("failed to open redis client for backplane subscriber")?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self { client, channel: channel.into(), stats, shutdown_tx })
    }

    pub fn stats(&self) -> Arc<BackplaneStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the background listener, forwarding each well-formed envelope's expanded events
    /// to `handler`. Reconnects with a fixed backoff on error.
    pub fn start(&self, handler: Arc<dyn InvalidationHandler>) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("backplane subscriber shutting down");
                    break;
                }

                match run_subscriber_loop(&client, &channel, Arc::clone(&handler), Arc::clone(&stats), &mut shutdown_rx).await {
                    Ok(()) => {
                        info!("backplane subscriber loop ended");
                        break;
                    }
                    Err(e) => {
                        error!("backplane subscriber error: {e}; reconnecting in 5s");
                        stats.processing_errors.fetch_add(1, Relaxed);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {},
                            _ = shutdown_rx.recv() => {
                                info!("backplane subscriber shutting down");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

async fn run_subscriber_loop(
    client: &redis::Client,
    channel: &str,
    handler: Arc<dyn InvalidationHandler>,
    stats: Arc<BackplaneStats>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    let mut pubsub = client.get_async_pubsub().await.context("failed to get backplane pubsub connection")?;
    pubsub.subscribe(channel).await.context("failed to subscribe to backplane channel")?;
    info!("subscribed to backplane channel: {channel}");

    let mut stream = pubsub.on_message();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(msg) => {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("backplane message had no string payload: {e}");
                                stats.processing_errors.fetch_add(1, Relaxed);
                                continue;
                            }
                        };
                        let envelope = match WireEnvelope::from_json(&payload) {
                            Ok(e) => e,
                            Err(e) => {
                                warn!("failed to parse backplane envelope: {e}");
                                stats.processing_errors.fetch_add(1, Relaxed);
                                continue;
                            }
                        };
                        if !envelope.is_valid() {
                            warn!("dropping malformed backplane envelope");
                            stats.processing_errors.fetch_add(1, Relaxed);
                            continue;
                        }
                        stats.messages_received.fetch_add(1, Relaxed);
                        for event in envelope.expand() {
                            if event.tag.is_some() {
                                stats.tag_invalidations_ignored.fetch_add(1, Relaxed);
                            } else {
                                stats.key_invalidations.fetch_add(1, Relaxed);
                            }
                            handler.handle(event).await;
                        }
                    }
                    None => return Err(anyhow::anyhow!("backplane pub/sub message stream ended")),
                }
            }
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}
