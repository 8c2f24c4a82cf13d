use chrono::Local;
use futures::future::{self, Either};
use futures::pin_mut;
use futures::stream::StreamExt;

use ingestor_core::debug::DEBUG;
use ingestor_core::decode::decode_metrics;
use ingestor_core::error;
use ingestor_core::labels::{text_to_labels, INSTANCE_LABEL};
use ingestor_core::shutdown::Shutdown;
use ingestor_core::topic::fqdn_from_topic;
use ingestor_core::Sample;
use ingestor_remote_write::RemoteWriter;

use crate::mqtt::MessageStream;

/// Per message orchestration: parse identity, decode, transform, write.
pub struct Pipeline {
    writer: RemoteWriter,
}

impl Pipeline {
    pub fn new(writer: RemoteWriter) -> Self {
        Pipeline { writer }
    }

    /// Handle one delivered message.
    ///
    /// Returns once the batch was accepted by the remote storage or
    /// abandoned by shutdown; a message that fails to parse or decode is
    /// dropped, never re-queued.
    pub async fn process(&mut self, topic: &str, payload: &[u8], shutdown: &Shutdown) {
        DEBUG.message_received();

        let fqdn = match fqdn_from_topic(topic) {
            Ok(fqdn) => fqdn,
            Err(err) => {
                DEBUG.message_skipped();
                eprintln!("Warn: skip data: {}", err);
                return;
            }
        };

        let metrics = match decode_metrics(payload) {
            Ok(metrics) => metrics,
            Err(err) => {
                DEBUG.decode_failed();
                eprintln!("Warn: failed to decode payload on {}: {}", topic, err);
                return;
            }
        };

        if error::verbose() {
            println!(
                "{}: received {} points from {}",
                Local::now().format("%H:%M:%S"),
                metrics.len(),
                fqdn
            );
        }

        // Convert the metrics to samples, replacing the "instance" label
        // with the FQDN from the topic. The topic is covered by the broker's
        // authentication, the payload labels are not.
        let mut samples = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let mut labels = text_to_labels(&metric.labels_text);
            labels.set(INSTANCE_LABEL, &fqdn);
            samples.push(Sample {
                labels,
                value: metric.value,
                timestamp: metric.timestamp_ms,
            });
        }

        // Write the samples to the remote storage; retries happen inside.
        if let Err(err) = self.writer.write_retrying(&samples, shutdown).await {
            // Serialization failing means a malformed batch; drop it.
            eprintln!("Warn: failed to encode write request: {}", err);
        }
    }
}

/// Drain the message stream until it closes or shutdown fires.
///
/// The single consumer is what serializes message handling: the next
/// delivery is not taken while a batch is still being written.
pub async fn consume(mut messages: MessageStream, mut pipeline: Pipeline, shutdown: Shutdown) {
    loop {
        if shutdown.is_shutdown() {
            break;
        }

        let next = messages.next();
        let stop = shutdown.wait();
        pin_mut!(next, stop);
        match future::select(next, stop).await {
            Either::Left((Some(Some(message)), _)) => {
                pipeline
                    .process(message.topic(), message.payload(), &shutdown)
                    .await;
            }
            // A None in the stream marks a dropped connection; the session
            // reconnects and the stream continues.
            Either::Left((Some(None), _)) => (),
            Either::Left((None, _)) | Either::Right(_) => break,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use prost::Message;

    use ingestor_remote_write::{proto, WriteError, WriteTransport};

    struct RecordingTransport {
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl WriteTransport for RecordingTransport {
        async fn send(&self, body: &[u8]) -> Result<(), WriteError> {
            self.bodies.lock().unwrap().push(body.to_vec());
            Ok(())
        }
    }

    fn pipeline() -> (Pipeline, Arc<Mutex<Vec<Vec<u8>>>>) {
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            bodies: bodies.clone(),
        };
        let writer = RemoteWriter::with_transport(Box::new(transport), Duration::from_millis(1));
        (Pipeline::new(writer), bodies)
    }

    fn compress_payload(json: &str) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn decode_body(body: &[u8]) -> proto::WriteRequest {
        let raw = snap::raw::Decoder::new().decompress_vec(body).unwrap();
        proto::WriteRequest::decode(&raw[..]).unwrap()
    }

    #[test]
    fn forwards_a_message_end_to_end() {
        async_std::task::block_on(async {
            let (mut pipeline, bodies) = pipeline();
            let (_sender, shutdown) = Shutdown::new();

            let payload =
                compress_payload(r#"[{"labels_text":"job=\"x\"","time_ms":1000,"value":1.5}]"#);
            pipeline
                .process("v1/agent/myfqdn/data", &payload, &shutdown)
                .await;

            let bodies = bodies.lock().unwrap();
            assert_eq!(bodies.len(), 1);

            let request = decode_body(&bodies[0]);
            assert_eq!(request.timeseries.len(), 1);
            let series = &request.timeseries[0];

            let labels: Vec<_> = series
                .labels
                .iter()
                .map(|label| (label.name.as_str(), label.value.as_str()))
                .collect();
            assert_eq!(labels, vec![("instance", "myfqdn"), ("job", "x")]);

            assert_eq!(series.samples.len(), 1);
            assert_eq!(series.samples[0].value, 1.5);
            // Timestamps are passed through in milliseconds
            assert_eq!(series.samples[0].timestamp, 1000);
        });
    }

    #[test]
    fn the_topic_overrides_the_instance_label() {
        async_std::task::block_on(async {
            let (mut pipeline, bodies) = pipeline();
            let (_sender, shutdown) = Shutdown::new();

            let payload = compress_payload(
                r#"[{"labels_text":"instance=\"spoofed\",job=\"x\"","time_ms":1,"value":1.0}]"#,
            );
            pipeline
                .process("v1/agent/aaaa,bbbb/data", &payload, &shutdown)
                .await;

            let bodies = bodies.lock().unwrap();
            let request = decode_body(&bodies[0]);
            let series = &request.timeseries[0];
            assert_eq!(series.labels[0].name, "instance");
            // The comma encoding in the topic is reversed as well
            assert_eq!(series.labels[0].value, "aaaa.bbbb");
        });
    }

    #[test]
    fn drops_messages_with_unexpected_topics() {
        async_std::task::block_on(async {
            let (mut pipeline, bodies) = pipeline();
            let (_sender, shutdown) = Shutdown::new();

            let payload = compress_payload(r#"[{"labels_text":"","time_ms":1,"value":1.0}]"#);
            pipeline
                .process("v1/agent/myfqdn/status", &payload, &shutdown)
                .await;

            assert!(bodies.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn drops_messages_with_malformed_payloads() {
        async_std::task::block_on(async {
            let (mut pipeline, bodies) = pipeline();
            let (_sender, shutdown) = Shutdown::new();

            pipeline
                .process("v1/agent/myfqdn/data", b"not a payload", &shutdown)
                .await;

            assert!(bodies.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn keeps_values_with_unparsable_labels() {
        async_std::task::block_on(async {
            let (mut pipeline, bodies) = pipeline();
            let (_sender, shutdown) = Shutdown::new();

            let payload = compress_payload(
                r#"[{"labels_text":"not a selector","time_ms":500,"value":42.0}]"#,
            );
            pipeline
                .process("v1/agent/myfqdn/data", &payload, &shutdown)
                .await;

            let bodies = bodies.lock().unwrap();
            let request = decode_body(&bodies[0]);
            let series = &request.timeseries[0];

            // The record degrades to the identity label alone
            assert_eq!(series.labels.len(), 1);
            assert_eq!(series.labels[0].name, "instance");
            assert_eq!(series.labels[0].value, "myfqdn");
            assert_eq!(series.samples[0].value, 42.0);
        });
    }
}
