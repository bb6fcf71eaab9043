use async_trait::async_trait;
use aws_sdk_kinesis::{error::DisplayErrorContext, primitives::Blob};
use domain::dispatch::{CommandPublisher, DeviceCommand, PublishError};

/// Puts device commands on a Kinesis stream, keyed by topic so commands for
/// one device stay ordered.
pub struct KinesisPublisher {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
}

impl KinesisPublisher {
    pub fn new(client: aws_sdk_kinesis::Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl CommandPublisher for KinesisPublisher {
    async fn publish(&self, command: &DeviceCommand) -> Result<(), PublishError> {
        tracing::debug!(
            "Publishing {} -> {}",
            command.topic,
            String::from_utf8_lossy(&command.payload)
        );

        self.client
            .put_record()
            .stream_name(&self.stream_name)
            .partition_key(&command.topic)
            .data(Blob::new(command.payload.clone()))
            .send()
            .await
            .map_err(|e| PublishError {
                topic: command.topic.clone(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(())
    }
}
