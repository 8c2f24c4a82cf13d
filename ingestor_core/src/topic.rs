use thiserror::Error;

/// The wildcard pattern matching every agent's data topic.
pub const DATA_TOPIC_PATTERN: &str = "v1/agent/+/data";

const DATA_TOPIC_PREFIX: &str = "v1/agent/";
const DATA_TOPIC_SUFFIX: &str = "/data";

#[derive(Error, Debug)]
#[error("could not parse FQDN from topic '{0}'")]
pub struct TopicError(String);

/// Get the agent FQDN from an MQTT topic.
///
/// The topic is expected to be of the form "v1/agent/fqdn/data". Agents
/// replace '.' with ',' in the FQDN so it fits in a single topic level;
/// convert it back to a '.'.
pub fn fqdn_from_topic(topic: &str) -> Result<String, TopicError> {
    topic
        .strip_prefix(DATA_TOPIC_PREFIX)
        .and_then(|rest| rest.strip_suffix(DATA_TOPIC_SUFFIX))
        .map(|fqdn| fqdn.replace(',', "."))
        .ok_or_else(|| TopicError(topic.to_string()))
}
