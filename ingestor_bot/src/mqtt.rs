use std::time::Duration;

use anyhow::{Context, Result};
use async_std::channel;
use futures::future::{self, Either};
use futures::pin_mut;
use paho_mqtt as mqtt;

use ingestor_core::debug::DEBUG;
use ingestor_core::error::debug_error;
use ingestor_core::shutdown::Shutdown;
use ingestor_core::topic::DATA_TOPIC_PATTERN;

use crate::config::Config;

/// Delay between connection attempts to the MQTT broker.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// How often a pending connection attempt checks the shutdown signal.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Size of the bounded queue between the MQTT client and the pipeline.
const MESSAGE_QUEUE_SIZE: usize = 16;

/// QoS 1: the broker redelivers messages that were not acknowledged.
const QOS: i32 = 1;

/// The stream deliveries are pushed into; None marks a dropped connection.
pub type MessageStream = mqtt::AsyncReceiver<Option<mqtt::Message>>;

/// The connection lifecycle of the MQTT session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// The shutdown signal fired while waiting.
struct Interrupted;

enum ConnectAttempt {
    Failed(mqtt::Error),
    Interrupted,
}

/// Owns the MQTT client and keeps the subscription alive: connects with
/// backoff, re-subscribes after every successful (re)connect, and watches
/// for connection loss.
pub struct Session {
    client: mqtt::AsyncClient,
    conn_opts: mqtt::ConnectOptions,
    lost: channel::Receiver<()>,
}

impl Session {
    /// Build the MQTT client from the configuration.
    ///
    /// Also returns the bounded stream deliveries are pushed into; its one
    /// consumer is the message pipeline, so at most one message is processed
    /// at a time and a stalled write stalls intake.
    pub fn new(config: &Config) -> Result<(Session, MessageStream)> {
        let create_opts = mqtt::CreateOptionsBuilder::new()
            .client_id(config.mqtt_username.as_str())
            .finalize();
        let mut client = mqtt::AsyncClient::new(create_opts).context("creating MQTT client")?;

        let messages = client.get_stream(MESSAGE_QUEUE_SIZE);

        // Forward connection loss notifications to the reconnect loop.
        let (lost_sender, lost) = channel::bounded(1);
        client.set_connection_lost_callback(move |_| {
            let _ = lost_sender.try_send(());
        });

        let mut conn_opts = mqtt::ConnectOptionsBuilder::new();
        conn_opts
            .server_uris(&config.mqtt_broker_urls)
            .user_name(config.mqtt_username.as_str())
            .password(config.mqtt_password.as_str())
            // A persistent session: the broker queues QoS 1 messages while
            // the ingestor is away.
            .clean_session(false);
        if config.mqtt_ssl_insecure || config.mqtt_ca_file.is_some() {
            let mut ssl_opts = mqtt::SslOptionsBuilder::new();
            ssl_opts.enable_server_cert_auth(!config.mqtt_ssl_insecure);
            if let Some(ca_file) = &config.mqtt_ca_file {
                ssl_opts
                    .trust_store(ca_file)
                    .with_context(|| format!("loading CA file {}", ca_file))?;
            }
            conn_opts.ssl_options(ssl_opts.finalize());
        }
        let conn_opts = conn_opts.finalize();

        Ok((
            Session {
                client,
                conn_opts,
                lost,
            },
            messages,
        ))
    }

    /// Drive the session state machine until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        let mut state = SessionState::Disconnected;
        loop {
            state = match state {
                SessionState::Disconnected => SessionState::Connecting,
                SessionState::Connecting => match self.connect(&shutdown).await {
                    Ok(()) => {
                        self.subscribe().await;
                        SessionState::Connected
                    }
                    Err(Interrupted) => SessionState::ShuttingDown,
                },
                SessionState::Connected => {
                    match self.await_connection_loss(&shutdown).await {
                        Ok(()) => SessionState::Disconnected,
                        Err(Interrupted) => SessionState::ShuttingDown,
                    }
                }
                SessionState::ShuttingDown => break,
            };
        }
    }

    /// Attempt to connect until it succeeds, backing off between failures.
    async fn connect(&self, shutdown: &Shutdown) -> Result<(), Interrupted> {
        loop {
            match self.connect_once(shutdown).await {
                Ok(()) => {
                    DEBUG.connect_succeeded();
                    println!("MQTT connection established");
                    return Ok(());
                }
                Err(ConnectAttempt::Interrupted) => return Err(Interrupted),
                Err(ConnectAttempt::Failed(err)) => {
                    DEBUG.connect_failed();
                    eprintln!(
                        "Warn: failed to connect to MQTT: {}, retry in {:?}",
                        err, RECONNECT_DELAY
                    );
                    debug_error(anyhow::Error::new(err).context("connecting to MQTT"));
                    if !shutdown.sleep(RECONNECT_DELAY).await {
                        return Err(Interrupted);
                    }
                }
            }
        }
    }

    /// A single connection attempt, polled so the shutdown signal is
    /// observed even while the client is still trying.
    async fn connect_once(&self, shutdown: &Shutdown) -> Result<(), ConnectAttempt> {
        let attempt = self.client.connect(self.conn_opts.clone());
        pin_mut!(attempt);
        loop {
            match async_std::future::timeout(CONNECT_POLL_INTERVAL, attempt.as_mut()).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(err)) => return Err(ConnectAttempt::Failed(err)),
                Err(_) if shutdown.is_shutdown() => return Err(ConnectAttempt::Interrupted),
                Err(_) => (),
            }
        }
    }

    /// Install the data subscription. On failure, log it; the subscription
    /// is retried via the next disconnect/reconnect cycle.
    async fn subscribe(&self) {
        if let Err(err) = self.client.subscribe(DATA_TOPIC_PATTERN, QOS).await {
            DEBUG.subscribe_failed();
            eprintln!(
                "Warn: failed to subscribe to {}: {}",
                DATA_TOPIC_PATTERN, err
            );
        }
    }

    /// Block until the broker connection drops or shutdown fires.
    async fn await_connection_loss(&self, shutdown: &Shutdown) -> Result<(), Interrupted> {
        let lost = self.lost.recv();
        let stop = shutdown.wait();
        pin_mut!(lost, stop);
        match future::select(lost, stop).await {
            Either::Left((Ok(()), _)) => {
                eprintln!("Warn: MQTT connection lost");
                Ok(())
            }
            // The loss channel closing means the client is gone; treat it
            // like shutdown rather than spinning on reconnects.
            Either::Left((Err(_), _)) => Err(Interrupted),
            Either::Right(_) => Err(Interrupted),
        }
    }
}
