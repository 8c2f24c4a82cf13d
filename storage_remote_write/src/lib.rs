//! # Storage: Prometheus Remote Write
//!
//! Encodes sample batches into the remote write wire format (protobuf plus
//! snappy) and sends them with indefinite fixed interval retries. A batch is
//! either accepted by the remote storage or abandoned at shutdown; it is
//! never silently dropped while the process is alive.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use prost::Message;
use thiserror::Error;

use ingestor_core::debug::DEBUG;
use ingestor_core::shutdown::Shutdown;
use ingestor_core::Sample;

/// The timeout of write requests sent to the remote storage.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between write attempts to the remote storage.
const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("remote write request failed: {0}")]
    Transport(surf::Error),
    #[error("remote write returned status {0}")]
    Status(surf::StatusCode),
    #[error("remote write timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("serialize write request: {0}")]
    Serialize(#[from] prost::EncodeError),
    // Unreachable once the output buffer is sized with `max_compress_len`.
    #[error("compress write request: {0}")]
    Compress(#[from] snap::Error),
}

/// How a batch handed to `write_retrying` ended up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The remote storage accepted the batch, after `retries` failed attempts.
    Sent { retries: usize },
    /// Shutdown fired before the batch could be delivered.
    Abandoned,
}

/// The transport half of the writer: sends one encoded request body.
#[async_trait]
pub trait WriteTransport: Send + Sync {
    async fn send(&self, body: &[u8]) -> Result<(), WriteError>;
}

/// Sends write requests over HTTP with a bounded timeout.
pub struct HttpTransport {
    url: surf::Url,
    client: surf::Client,
}

impl HttpTransport {
    pub fn new(write_url: &str) -> Result<Self> {
        let url = surf::Url::parse(write_url)
            .with_context(|| format!("invalid remote write url '{}'", write_url))?;
        Ok(HttpTransport {
            url,
            client: surf::Client::new(),
        })
    }
}

#[async_trait]
impl WriteTransport for HttpTransport {
    async fn send(&self, body: &[u8]) -> Result<(), WriteError> {
        let request = self
            .client
            .post(self.url.as_str())
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .body(surf::Body::from_bytes(body.to_vec()));

        match async_std::future::timeout(CLIENT_TIMEOUT, request).await {
            Err(_) => Err(WriteError::Timeout),
            Ok(Err(err)) => Err(WriteError::Transport(err)),
            Ok(Ok(response)) if !response.status().is_success() => {
                Err(WriteError::Status(response.status()))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

/// Writes sample batches to a Prometheus remote write endpoint.
///
/// Owns the encoding scratch buffers; neither they nor the transport are
/// safe for concurrent use, so a writer belongs to exactly one task.
pub struct RemoteWriter {
    transport: Box<dyn WriteTransport>,
    retry_delay: Duration,
    encoder: snap::raw::Encoder,
    /// Serialized request bytes, cleared (not reallocated) per batch.
    proto_buf: Vec<u8>,
    /// Compressed request body, grown once and reused across batches.
    snap_buf: Vec<u8>,
}

impl RemoteWriter {
    pub fn new(write_url: &str) -> Result<Self> {
        let transport = HttpTransport::new(write_url)?;
        Ok(RemoteWriter::with_transport(Box::new(transport), RETRY_DELAY))
    }

    /// Writer with a custom transport and retry delay.
    pub fn with_transport(transport: Box<dyn WriteTransport>, retry_delay: Duration) -> Self {
        RemoteWriter {
            transport,
            retry_delay,
            encoder: snap::raw::Encoder::new(),
            proto_buf: Vec::new(),
            snap_buf: Vec::new(),
        }
    }

    /// Send one batch, retrying at a fixed interval until the remote storage
    /// accepts it or shutdown fires.
    ///
    /// Every attempt resends the same encoded bytes; the batch is never
    /// re-encoded. The await also serves as backpressure: the caller cannot
    /// hand over the next batch while this one is still being retried.
    pub async fn write_retrying(
        &mut self,
        samples: &[Sample],
        shutdown: &Shutdown,
    ) -> Result<WriteOutcome, EncodeError> {
        let len = self.encode_write_request(samples)?;

        let mut retries = 0;
        loop {
            match self.transport.send(&self.snap_buf[..len]).await {
                Ok(()) => {
                    DEBUG.write_succeeded();
                    if retries > 0 {
                        DEBUG.write_recovered();
                        println!("Writing to remote storage recovered, resuming normal operation");
                    }
                    return Ok(WriteOutcome::Sent { retries });
                }
                Err(err) => {
                    DEBUG.write_failed();
                    eprintln!(
                        "Warn: failed to write points to the remote storage: {}, retry in {:?}",
                        err, self.retry_delay
                    );
                    if !shutdown.sleep(self.retry_delay).await {
                        return Ok(WriteOutcome::Abandoned);
                    }
                    retries += 1;
                }
            }
        }
    }

    /// Build the compressed write request for a batch, reusing the scratch
    /// buffers. Returns the length of the body in `snap_buf`.
    fn encode_write_request(&mut self, samples: &[Sample]) -> Result<usize, EncodeError> {
        let request = proto::WriteRequest {
            timeseries: samples_to_timeseries(samples),
        };

        self.proto_buf.clear();
        request.encode(&mut self.proto_buf)?;

        // Size the output so the compressor never has to allocate.
        let max_len = snap::raw::max_compress_len(self.proto_buf.len());
        if self.snap_buf.len() < max_len {
            self.snap_buf.resize(max_len, 0);
        }
        let len = self.encoder.compress(&self.proto_buf, &mut self.snap_buf)?;
        Ok(len)
    }
}

fn samples_to_timeseries(samples: &[Sample]) -> Vec<proto::TimeSeries> {
    samples
        .iter()
        .map(|sample| proto::TimeSeries {
            labels: sample
                .labels
                .iter()
                .map(|(name, value)| proto::Label {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            samples: vec![proto::Sample {
                value: sample.value,
                timestamp: sample.timestamp,
            }],
        })
        .collect()
}

/// Wire format structs for the remote write protocol.
///
/// Declared inline with prost rather than compiled from a .proto file; the
/// tags match prometheus' prompb/remote.proto and prompb/types.proto.
pub mod proto {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}
