use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug)]
pub struct Config {
    /// Enables verbose logging (per-message lines, error cause chains)
    pub debug: bool,

    /// How frequently to log internal debug metrics
    pub debug_interval: Option<Duration>,

    /// The url to send prometheus remote write requests to
    pub remote_write_url: String,

    /// The MQTT broker urls to try, in order
    pub mqtt_broker_urls: Vec<String>,

    /// Credentials for the MQTT broker; the username doubles as client id
    pub mqtt_username: String,
    pub mqtt_password: String,

    /// Skip verification of the broker certificate
    pub mqtt_ssl_insecure: bool,

    /// Path to a PEM file with the root CA used by the broker
    pub mqtt_ca_file: Option<String>,
}

impl Config {
    /// Loads configuration from arguments, env and dotenv
    pub fn load() -> Result<Config> {
        // Attempts to find a `.env` file to initialize/extend the environment
        dotenv::dotenv().ok();

        // Load the config from arguments, then environment variables
        let env = Environment::from_args();

        Ok(Config {
            debug: env.debug
                || match dotenv::var("INGESTOR_DEBUG").ok() {
                    Some(val) if val == "true" || val == "on" || val == "1" => true,
                    Some(val) if val == "false" || val == "off" || val == "0" || val == "" => false,
                    Some(val) => val.parse::<bool>().context("invalid INGESTOR_DEBUG")?,
                    None => false,
                },
            debug_interval: match env.debug_interval {
                ToggleValue::Enabled(secs) => Some(Duration::from_secs(secs)),
                ToggleValue::EnabledDefault => Some(Duration::from_secs(300)),
                ToggleValue::Disabled => None,
            },
            remote_write_url: env.remote_write_url,
            mqtt_broker_urls: env
                .mqtt_broker_url
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect(),
            mqtt_username: env.mqtt_username,
            mqtt_password: env.mqtt_password,
            mqtt_ssl_insecure: env.mqtt_ssl_insecure
                || match dotenv::var("INGESTOR_MQTT_SSL_INSECURE").ok() {
                    Some(val) if val == "true" || val == "on" || val == "1" => true,
                    Some(val) if val == "false" || val == "off" || val == "0" || val == "" => false,
                    Some(val) => val
                        .parse::<bool>()
                        .context("invalid INGESTOR_MQTT_SSL_INSECURE")?,
                    None => false,
                },
            mqtt_ca_file: env.mqtt_ca_file,
        })
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "ingestor-bot")]
struct Environment {
    /// Enables verbose logging of message handling
    #[structopt(short, long)]
    debug: bool,

    /// How frequently (in seconds) to log internal debug metrics
    #[structopt(long, env = "INGESTOR_DEBUG_INTERVAL", default_value = "300")]
    debug_interval: ToggleValue<u64>,

    /// The url to send prometheus remote write requests to
    #[structopt(
        long,
        env = "INGESTOR_REMOTE_WRITE_URL",
        default_value = "http://localhost:9201/api/v1/write"
    )]
    remote_write_url: String,

    /// A comma separated list of MQTT broker urls
    #[structopt(
        long,
        env = "INGESTOR_MQTT_BROKER_URL",
        default_value = "tcp://localhost:1883"
    )]
    mqtt_broker_url: String,

    /// The username used to authenticate with the MQTT broker
    #[structopt(long, env = "INGESTOR_MQTT_USERNAME", default_value = "")]
    mqtt_username: String,

    /// The password used to authenticate with the MQTT broker
    #[structopt(
        long,
        env = "INGESTOR_MQTT_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    mqtt_password: String,

    /// Disable verification of the broker certificate
    #[structopt(long)]
    mqtt_ssl_insecure: bool,

    /// Path to a PEM file with the root CA used by the broker
    #[structopt(long, env = "INGESTOR_MQTT_CA_FILE")]
    mqtt_ca_file: Option<String>,
}

#[derive(Debug, Eq, PartialEq)]
enum ToggleValue<T: FromStr> {
    Enabled(T),
    EnabledDefault,
    Disabled,
}

impl<T: FromStr> Default for ToggleValue<T> {
    fn default() -> Self {
        ToggleValue::Disabled
    }
}

impl<T: FromStr> FromStr for ToggleValue<T> {
    type Err = T::Err;
    fn from_str(val: &str) -> std::result::Result<Self, Self::Err> {
        match val {
            "false" | "off" | "0" | "" => Ok(ToggleValue::Disabled),
            "true" | "on" | "1" => Ok(ToggleValue::EnabledDefault),
            _ => val.parse().map(ToggleValue::Enabled),
        }
    }
}
