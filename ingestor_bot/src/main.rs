//! MQTT metrics ingestor.
//!
//! Receives metric batches published by agents over MQTT and forwards them
//! to a Prometheus remote write endpoint.

mod config;
mod mqtt;
mod pipeline;

use std::cell::Cell;

use anyhow::{Context, Result};
use futures::stream::StreamExt;

use ingestor_core::debug::DEBUG;
use ingestor_core::error;
use ingestor_core::shutdown::Shutdown;
use ingestor_remote_write::RemoteWriter;

use crate::config::Config;
use crate::pipeline::Pipeline;

/// The program's main entry point.
fn main() -> Result<()> {
    let config = Config::load()?;

    let (send_shutdown, shutdown) = Shutdown::new();

    // When we receive a SIGINT (or SIGTERM) signal, begin exiting.
    let signal_once = Cell::new(Some(send_shutdown));
    ctrlc::set_handler(move || {
        // The first time we receive the signal, shutdown gracefully
        if let Some(sender) = signal_once.take() {
            let _ = sender.send(());
        }
        // The second time we receive the signal, shutdown immediately
        else {
            std::process::exit(1);
        }
    })?;

    // Start the main event loop
    async_std::task::block_on(run(config, shutdown))
}

/// The main task's event loop
async fn run(config: Config, shutdown: Shutdown) -> Result<()> {
    error::set_verbose(config.debug);
    println!("Starting ingestor");

    // Misconfiguration is the only fatal error: fail before connecting.
    let writer =
        RemoteWriter::new(&config.remote_write_url).context("creating remote write client")?;

    let (session, messages) = mqtt::Session::new(&config)?;

    // The single consumer of the message stream; a retrying write blocks
    // intake of the next message.
    let consumer = async_std::task::spawn(pipeline::consume(
        messages,
        Pipeline::new(writer),
        shutdown.clone(),
    ));

    // Keep the connection and the subscription alive until shutdown.
    let supervisor = async_std::task::spawn(session.run(shutdown.clone()));

    // Every debug interval, log debug information
    let debug_interval = config.debug_interval.map(|duration| {
        async_std::task::spawn(async move {
            let mut interval = async_std::stream::interval(duration);
            while interval.next().await.is_some() {
                DEBUG.publish();
            }
        })
    });

    // Shutdown when the process is killed
    shutdown.wait().await;
    supervisor.await;
    consumer.await;
    if let Some(debug_interval) = debug_interval {
        debug_interval.cancel().await;
    }

    println!("Ingestor stopped");
    Ok(())
}
