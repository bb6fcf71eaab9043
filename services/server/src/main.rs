mod config;
mod publisher;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use aws_config::{BehaviorVersion, SdkConfig};
use cqrs_es::EventStore;
use domain::dispatch::{
    command_queue, outbound::HEARTBEAT_PERIOD, run_publisher, CommandPublisher, Dispatcher,
    LogPublisher,
};
use domain::droppers::{
    cqrs, Dropper, DynamoScheduleIndex, Inventory, MemScheduleIndex, ScheduleIndex,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};

use crate::config::{Config, StoreBackend};
use crate::publisher::KinesisPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(false)
        .init();

    let publisher: Arc<dyn CommandPublisher> = match &config.command_stream {
        Some(stream) => {
            info!("Publishing device commands to stream {}", stream);
            let client = aws_sdk_kinesis::Client::new(&aws().await);
            Arc::new(KinesisPublisher::new(client, stream.as_str()))
        }
        None => {
            info!("COMMAND_STREAM_NAME not set, device commands are only logged");
            Arc::new(LogPublisher)
        }
    };

    match config.store {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            let index = Arc::new(MemScheduleIndex::default());
            let inventory = cqrs::inventory(cqrs::mem_store(), cqrs::init_mem_repo(), index.clone())
                .with_timeout(config.dispatch.store_timeout);
            serve(config, Arc::new(inventory), index, publisher).await
        }
        StoreBackend::Dynamo => {
            info!("Using DynamoDB store, event log {}", config.tables.event_log);
            let client = aws_sdk_dynamodb::Client::new(&aws().await);
            let repo = cqrs::init_repo(client.clone(), &config.tables);
            let index = Arc::new(DynamoScheduleIndex::new(
                client.clone(),
                &config.tables.schedule_index,
            ));
            let store = cqrs::dynamo_store(client, &config.tables);
            let inventory = cqrs::inventory(store, repo, index.clone())
                .with_timeout(config.dispatch.store_timeout);
            serve(config, Arc::new(inventory), index, publisher).await
        }
    }
}

async fn aws() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}

/// Runs the HTTP gateway, the dispatch loop and the command publisher until
/// ctrl-c or until the dispatch loop fails. Shutdown order: stop accepting
/// requests and ticks, then let the publisher drain the queue.
async fn serve<ES>(
    config: Config,
    inventory: Arc<Inventory<ES>>,
    index: Arc<dyn ScheduleIndex>,
    publisher: Arc<dyn CommandPublisher>,
) -> anyhow::Result<()>
where
    ES: EventStore<Dropper> + 'static,
    ES::AC: Send,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outbound, queue) = command_queue(config.queue_capacity);

    let publisher_task = tokio::spawn(run_publisher(queue, publisher, HEARTBEAT_PERIOD));

    let dispatcher = Dispatcher::new(
        inventory.clone(),
        index,
        outbound,
        config.dispatch.clone(),
        shutdown_rx.clone(),
    );
    let mut dispatch_task = tokio::spawn(async move { dispatcher.run().await });

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!("Listening on {}", listener.local_addr()?);

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, routes::router(inventory)).with_graceful_shutdown(
        async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        },
    );
    let server_task = tokio::spawn(async move { server.await });

    let dispatch_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!("Failed to listen for ctrl-c: {}", err);
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
            (&mut dispatch_task).await
        }
        result = &mut dispatch_task => {
            let _ = shutdown_tx.send(true);
            result
        }
    };

    server_task.await?.context("HTTP server failed")?;
    publisher_task.await?;

    dispatch_result?.context("dispatch loop stopped")?;
    info!("Shutdown complete");
    Ok(())
}
