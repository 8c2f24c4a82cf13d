use std::io;

use flate2::read::ZlibDecoder;
use serde::Deserialize;
use thiserror::Error;

/// One measurement from an agent's data payload.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricPayload {
    /// Metric identity as selector text, e.g. `__name__="cpu_used",core="0"`.
    pub labels_text: String,
    /// Timestamp in milliseconds.
    #[serde(rename = "time_ms")]
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("decode metrics JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("finalize compressed payload: {0}")]
    Finalize(#[source] io::Error),
}

/// Decode a zlib compressed JSON payload into its list of measurements.
///
/// The decompressed stream is drained to completion after parsing so the
/// zlib checksum is always verified. The data comes from authenticated
/// agents, so no decompressed-size cap is applied.
pub fn decode_metrics(input: &[u8]) -> Result<Vec<MetricPayload>, DecodeError> {
    let mut decoder = ZlibDecoder::new(input);

    let mut json = serde_json::Deserializer::from_reader(&mut decoder);
    let metrics = Vec::<MetricPayload>::deserialize(&mut json).map_err(DecodeError::Parse)?;

    io::copy(&mut decoder, &mut io::sink()).map_err(DecodeError::Finalize)?;

    Ok(metrics)
}
