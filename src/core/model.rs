//! Capture configuration data model.
//!
//! The same shape is used for partial layers read from the store and for the
//! fully resolved configuration. In a layer, zero, empty and `false` all mean
//! "unset".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output fields exported when nothing else is configured.
pub const DEFAULT_OUTPUT_FIELDS: [&str; 8] = [
    "flowStartMilliseconds",
    "flowEndMilliseconds",
    "sourceIPv4Address",
    "destinationIPv4Address",
    "sourceTransportPort",
    "destinationTransportPort",
    "protocolIdentifier",
    "silkAppLabel",
];

/// Packet capture parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    /// Capture interface, e.g. `eth0`.
    pub interface: String,
    /// Local IPFIX export port.
    pub ipfix_port: u16,
    /// Idle flow timeout in seconds.
    pub idle_timeout: u32,
    /// Active flow timeout in seconds.
    pub active_timeout: u32,
    /// Statistics export interval in seconds.
    pub stats_interval: u32,
    /// Application labeling.
    #[serde(rename = "enable_applabel")]
    pub enable_app_label: bool,
    /// Deep packet inspection.
    pub enable_dpi: bool,
    /// Maximum payload bytes captured per flow.
    pub max_payload: u32,
}

/// Address and port filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Networks to capture (CIDR or address).
    pub ip_whitelist: Vec<String>,
    /// Networks to exclude.
    pub ip_blacklist: Vec<String>,
    /// Source ports to capture.
    pub src_ports: Vec<u16>,
    /// Destination ports to capture.
    pub dst_ports: Vec<u16>,
    /// Base BPF expression.
    pub bpf_filter: String,
}

/// Exported flow record fields, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Ordered field names.
    pub fields: Vec<String>,
}

/// Status reporting of the downstream flow processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReportConfig {
    /// Report endpoint; empty disables reporting.
    pub status_report_url: String,
    /// Report interval in seconds.
    pub status_report_interval_sec: u32,
    /// Reporting identity; empty lets the processor pick its hostname.
    pub uuid: String,
}

/// Complete capture configuration.
///
/// Used both for a single layer (where unset fields are zero/empty) and for
/// the merged result (where [`CaptureConfig::defaults`] guarantees every
/// field is populated).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture parameters.
    pub capture: CaptureParams,
    /// Filters.
    pub filter: FilterConfig,
    /// Output fields.
    pub output: OutputConfig,
    /// Status reporting.
    pub status_report: StatusReportConfig,
}

impl CaptureConfig {
    /// The compiled-in defaults every merge starts from.
    pub fn defaults() -> Self {
        Self {
            capture: CaptureParams {
                interface: "eth0".to_string(),
                ipfix_port: 18000,
                idle_timeout: 60,
                active_timeout: 60,
                stats_interval: 300,
                enable_app_label: true,
                enable_dpi: false,
                max_payload: 1024,
            },
            filter: FilterConfig {
                ip_whitelist: Vec::new(),
                ip_blacklist: Vec::new(),
                src_ports: Vec::new(),
                dst_ports: Vec::new(),
                bpf_filter: "ip and not port 22".to_string(),
            },
            output: OutputConfig {
                fields: DEFAULT_OUTPUT_FIELDS.iter().map(|f| f.to_string()).collect(),
            },
            status_report: StatusReportConfig {
                status_report_url: String::new(),
                status_report_interval_sec: 60,
                uuid: String::new(),
            },
        }
    }

    /// Decode a layer payload as published by the authoring backend.
    pub fn from_layer_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// Scope of a configuration layer, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerScope {
    /// Fleet-wide layer.
    Global,
    /// Per-cluster layer.
    Cluster,
    /// Per-node layer.
    Node,
}

impl LayerScope {
    /// All scopes in merge order.
    pub const ALL: [LayerScope; 3] = [LayerScope::Global, LayerScope::Cluster, LayerScope::Node];

    /// Lowercase scope name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerScope::Global => "global",
            LayerScope::Cluster => "cluster",
            LayerScope::Node => "node",
        }
    }
}

impl fmt::Display for LayerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(LayerScope::Global),
            "cluster" => Ok(LayerScope::Cluster),
            "node" => Ok(LayerScope::Node),
            other => Err(format!(
                "unknown scope '{}', expected global, cluster or node",
                other
            )),
        }
    }
}

/// One scope's configuration as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    /// Which scope the layer belongs to.
    pub scope: LayerScope,
    /// Store path it was read from.
    pub path: String,
    /// Decoded (partial) configuration.
    pub config: CaptureConfig,
}
