//! `wspipe` binary: an echo server and a one-shot text client.

mod cli;

use std::future;

use clap::Parser;
use futures::{StreamExt, stream};
use tokio::sync::oneshot;
use wspipe::{
    Accepted,
    Message,
    MessageStream,
    Pipeline,
    PipelineConfig,
    PipelineContext,
    PipelineError,
    ServerConfig,
};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    install_metrics(&cli)?;

    let context = PipelineContext::try_current()?;
    let config = PipelineConfig::default().handshake_timeout(cli.handshake_timeout());
    let pipeline = Pipeline::new(context.clone()).with_config(config);

    match cli.command {
        Command::Serve { bind, workers } => {
            let mut server = ServerConfig::default();
            if let Some(workers) = workers {
                server = server.workers(workers);
            }
            let binding = pipeline
                .with_server_config(server)
                .listen(bind, |_: Accepted, inbound: MessageStream| {
                    inbound.filter_map(|item| future::ready(item.ok().filter(Message::is_data)))
                })
                .await?;
            println!("listening on {}", binding.local_addr());
            tokio::signal::ctrl_c().await?;
            binding.unbind().await;
        }
        Command::Send { url, messages } => {
            send(&pipeline, &url, messages).await?;
        }
    }

    context.shutdown().await;
    Ok(())
}

async fn send(pipeline: &Pipeline, url: &str, messages: Vec<String>) -> Result<(), PipelineError> {
    let expected = messages.len();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    // ends the outbound stream once every reply arrived
    let finished = stream::once(done_rx).filter_map(|_| future::ready(None));
    let outbound = stream::iter(messages.into_iter().map(Message::text)).chain(finished);
    let mut conn = pipeline.open(url, outbound);
    let handshake = conn.handshake.await?;
    if let Some(protocol) = &handshake.subprotocol {
        println!("subprotocol: {protocol}");
    }
    let mut received = 0;
    while received < expected {
        match conn.inbound.recv().await {
            Some(Ok(message)) if message.is_data() => {
                println!("{message}");
                received += 1;
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => return Err(error),
            None => break,
        }
    }
    drop(done_tx);
    conn.handle.closed().await.into_result()
}

#[cfg(feature = "metrics")]
fn install_metrics(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(addr) = cli.metrics {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.metrics.is_some() {
        log::warn!("metrics requested but the metrics feature is disabled");
    }
    Ok(())
}
