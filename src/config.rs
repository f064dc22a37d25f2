use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rumqttc::QoS;
use serde_json::json;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8883;
pub const ENV_CONFIG_PATH: &str = "GG_CONFIG_PATH";
pub const NUCLEUS_SERVICE: &str = "aws.greengrass.Nucleus";

/// Identity and broker settings for one receiver, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub endpoint: String,
    pub thing_name: String,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
    pub root_ca_path: PathBuf,
    pub port: u16,
    /// Parent directory for per-update scratch directories.
    pub work_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub region: String,
    pub endpoint_override: Option<String>,
    pub devices: Vec<String>,
    pub broadcast: bool,
    pub qos: QoS,
    pub spacing: Duration,
    pub payload: serde_json::Value,
}

// Serde structs for the Greengrass nucleus config.yaml
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    system: Option<RawSystem>,
    // Other services carry arbitrary shapes, so only the nucleus entry is inspected.
    #[serde(default)]
    services: Option<HashMap<String, serde_yaml::Value>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawSystem {
    #[serde(default)]
    thing_name: Option<String>,
    #[serde(default)]
    certificate_file_path: Option<String>,
    #[serde(default)]
    private_key_path: Option<String>,
    #[serde(default)]
    root_ca_path: Option<String>,
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Parse `key` when set, `default` when unset or blank. A value that is set
/// but does not parse is an error naming the variable.
fn or_default<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match optional(lookup, key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key}: invalid value {v:?}"))),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Ordered list of places the device config may live.
fn config_candidates(
    override_path: Option<&Path>,
    env_path: Option<String>,
    exe_dir: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = override_path {
        candidates.push(expand_home(path, home.as_deref()));
    }
    if let Some(path) = non_empty(env_path) {
        candidates.push(expand_home(Path::new(&path), home.as_deref()));
    }
    if let Some(dir) = exe_dir {
        candidates.push(dir.join("certs").join("config.yaml"));
    }
    if let Some(home) = home {
        candidates.push(home.join("greengrass").join("v2").join("config.yaml"));
    }
    candidates
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn first_existing(candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    match candidates.iter().find(|p| p.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(ConfigError::NotFound(candidates)),
    }
}

/// Locate the device config file: explicit override, `GG_CONFIG_PATH`,
/// `certs/config.yaml` next to the executable, then
/// `~/greengrass/v2/config.yaml`.
pub fn resolve_config_path(override_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    first_existing(config_candidates(
        override_path,
        env_lookup(ENV_CONFIG_PATH),
        exe_dir,
        dirs::home_dir(),
    ))
}

/// Read and validate the device config at `path`, falling back to
/// `AWS_IOT_ENDPOINT` / `GG_THING_NAME` for values the file leaves empty.
pub fn load_config(path: &Path) -> Result<DeviceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path, env_lookup)
}

pub fn parse_config(
    content: &str,
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<DeviceConfig, ConfigError> {
    let raw: RawConfig = if content.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_yaml::from_str::<Option<RawConfig>>(content)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
            .unwrap_or_default()
    };

    let system = raw.system.unwrap_or_default();
    let file_endpoint = raw
        .services
        .as_ref()
        .and_then(|services| services.get(NUCLEUS_SERVICE))
        .and_then(|nucleus| nucleus.get("configuration"))
        .and_then(|configuration| configuration.get("iotDataEndpoint"))
        .and_then(serde_yaml::Value::as_str)
        .map(str::to_string);

    let endpoint = non_empty(file_endpoint).or_else(|| optional(&lookup, "AWS_IOT_ENDPOINT"));
    let thing_name = non_empty(system.thing_name).or_else(|| optional(&lookup, "GG_THING_NAME"));
    let certificate_path = non_empty(system.certificate_file_path);
    let private_key_path = non_empty(system.private_key_path);
    let root_ca_path = non_empty(system.root_ca_path);

    let missing: Vec<&'static str> = [
        ("iotDataEndpoint", endpoint.is_none()),
        ("thingName", thing_name.is_none()),
        ("certificateFilePath", certificate_path.is_none()),
        ("privateKeyPath", private_key_path.is_none()),
        ("rootCaPath", root_ca_path.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let port = or_default(&lookup, "AWS_IOT_PORT", DEFAULT_PORT)?;

    match (endpoint, thing_name, certificate_path, private_key_path, root_ca_path) {
        (Some(endpoint), Some(thing_name), Some(cert), Some(key), Some(ca)) => Ok(DeviceConfig {
            endpoint,
            thing_name,
            certificate_path: PathBuf::from(cert),
            private_key_path: PathBuf::from(key),
            root_ca_path: PathBuf::from(ca),
            port,
            work_root: optional(&lookup, "UPDATE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
        }),
        _ => Err(ConfigError::MissingFields(missing)),
    }
}

impl SenderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let devices = optional(&lookup, "RECEIVER_DEVICES")
            .unwrap_or_else(|| "Laptop-Core-1".to_string())
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect();

        let broadcast = match optional(&lookup, "ENABLE_BROADCAST") {
            Some(v) => parse_bool(&v)
                .ok_or_else(|| ConfigError::Invalid(format!("ENABLE_BROADCAST: invalid value {v:?}")))?,
            None => false,
        };

        let qos = match or_default(&lookup, "PUBLISH_QOS", 1u8)? {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "PUBLISH_QOS must be 0 or 1, got {other}"
                )));
            }
        };

        let payload = match optional(&lookup, "COMMAND_PAYLOAD") {
            Some(raw) => parse_payload(&raw)?,
            None => sample_payload(),
        };

        let config = Self {
            region: or_default(&lookup, "AWS_REGION", "us-east-1".to_string())?,
            endpoint_override: optional(&lookup, "AWS_IOT_ENDPOINT"),
            devices,
            broadcast,
            qos,
            spacing: Duration::from_millis(or_default(&lookup, "PUBLISH_SPACING_MS", 200)?),
            payload,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("AWS_REGION must not be empty".into()));
        }
        if self.devices.is_empty() && !self.broadcast {
            return Err(ConfigError::Invalid(
                "No receiver devices configured and broadcast disabled".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A command payload must be a JSON object with a string `action`.
fn parse_payload(raw: &str) -> Result<serde_json::Value, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ConfigError::Invalid(format!("COMMAND_PAYLOAD is not valid JSON: {e}")))?;
    match value.get("action") {
        Some(serde_json::Value::String(_)) => Ok(value),
        _ => Err(ConfigError::Invalid(
            "COMMAND_PAYLOAD must be a JSON object with a string \"action\"".into(),
        )),
    }
}

/// Demonstration payload: a command the receiver only logs.
pub fn sample_payload() -> serde_json::Value {
    json!({
        "action": "start_detection",
        "config": {
            "camera_resolution": "1280x720",
            "detection_threshold": 0.5,
        },
    })
}
