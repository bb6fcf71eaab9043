use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use derive_new::new;
use thiserror::Error;
use tokio::sync::mpsc;

pub const DROP_TOPIC_ROOT: &str = "devices/disp/drop";
pub const HEALTH_TOPIC: &str = "health/up";
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Mode sentinel the device expects in front of the slot number.
const DROP_MODE: u8 = 0;

/// Message for the device transport
#[derive(Clone, Debug, PartialEq, Eq, new)]
pub struct DeviceCommand {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl DeviceCommand {
    /// "Move to `slot` and drop" for the dropper answering to `serial_id`.
    pub fn drop_pill(serial_id: &str, slot: u8) -> Self {
        Self::new(
            drop_route(serial_id),
            format!("{},{}", DROP_MODE, slot).into_bytes(),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(HEALTH_TOPIC.to_string(), b"UP".to_vec())
    }
}

pub fn drop_route(serial_id: &str) -> String {
    format!("{}/{}", DROP_TOPIC_ROOT, serial_id)
}

pub type CommandSender = mpsc::Sender<DeviceCommand>;
pub type CommandReceiver = mpsc::Receiver<DeviceCommand>;

/// Bounded queue between the dispatch loop and the transport task. Senders
/// wait when it is full.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(capacity)
}

#[derive(Error, Debug)]
#[error("Publish to {topic} failed: {message}")]
pub struct PublishError {
    pub topic: String,
    pub message: String,
}

/// Delivers commands to devices. Fire-and-forget: no device ack is awaited.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, command: &DeviceCommand) -> Result<(), PublishError>;
}

/// Publisher that only logs, for local runs without a transport.
pub struct LogPublisher;

#[async_trait]
impl CommandPublisher for LogPublisher {
    async fn publish(&self, command: &DeviceCommand) -> Result<(), PublishError> {
        tracing::info!(
            "Publishing {} -> {}",
            command.topic,
            String::from_utf8_lossy(&command.payload)
        );
        Ok(())
    }
}

/// Drains the queue into `publisher` until every sender is dropped, sending a
/// heartbeat every `heartbeat` in between.
pub async fn run_publisher(
    mut queue: CommandReceiver,
    publisher: Arc<dyn CommandPublisher>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);

    loop {
        tokio::select! {
            command = queue.recv() => match command {
                Some(command) => {
                    if let Err(err) = publisher.publish(&command).await {
                        tracing::error!("Dropping command: {}", err);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(err) = publisher.publish(&DeviceCommand::heartbeat()).await {
                    tracing::warn!("Heartbeat failed: {}", err);
                }
            }
        }
    }

    tracing::info!("Command queue closed, publisher stopped");
}
