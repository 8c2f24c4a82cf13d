pub mod debug;
pub mod decode;
pub mod error;
pub mod labels;
pub mod shutdown;
pub mod topic;

use crate::labels::LabelSet;

/// A single ready-to-send measurement: a label set with the agent identity
/// merged in, the value, and its timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: f64,
    /// Timestamp in milliseconds.
    pub timestamp: i64,
}
