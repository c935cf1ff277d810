use crate::core::CaptureConfig;
use crate::core::model::DEFAULT_OUTPUT_FIELDS;
use std::fmt::Write;

/// Values substituted into the artifact after the renderer's own defaulting.
///
/// Independently of the merge defaults, zero or empty sub-fields fall back to
/// fixed values here so a partially populated configuration still renders a
/// usable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderValues {
    /// Capture interface.
    pub interface: String,
    /// IPFIX export port.
    pub ipfix_port: u16,
    /// Idle flow timeout (s).
    pub idle_timeout: u32,
    /// Active flow timeout (s).
    pub active_timeout: u32,
    /// Stats interval (s).
    pub stats_interval: u32,
    /// Composed BPF expression.
    pub filter: String,
    /// Application labeling.
    pub app_label: bool,
    /// Deep packet inspection.
    pub dpi: bool,
    /// Max payload bytes.
    pub max_payload: u32,
    /// Exported fields, in order.
    pub output_fields: Vec<String>,
    /// Status report endpoint.
    pub status_report_url: String,
    /// Status report interval (s).
    pub status_report_interval_sec: u32,
    /// Reporting identity, omitted when empty.
    pub uuid: String,
}

impl RenderValues {
    /// Derive render values from a resolved configuration.
    pub fn from_config(config: &CaptureConfig) -> Self {
        let capture = &config.capture;
        Self {
            interface: or_default(&capture.interface, "eth0"),
            ipfix_port: nonzero(capture.ipfix_port, 18000),
            idle_timeout: nonzero(capture.idle_timeout, 60),
            active_timeout: nonzero(capture.active_timeout, 60),
            stats_interval: nonzero(capture.stats_interval, 300),
            filter: bpf_filter(config),
            app_label: capture.enable_app_label,
            dpi: capture.enable_dpi,
            max_payload: capture.max_payload,
            output_fields: if config.output.fields.is_empty() {
                DEFAULT_OUTPUT_FIELDS.iter().map(|f| f.to_string()).collect()
            } else {
                config.output.fields.clone()
            },
            status_report_url: config.status_report.status_report_url.clone(),
            status_report_interval_sec: nonzero(
                config.status_report.status_report_interval_sec,
                60,
            ),
            uuid: config.status_report.uuid.clone(),
        }
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() { fallback } else { value }.to_string()
}

fn nonzero<N: Copy + Default + PartialEq>(value: N, fallback: N) -> N {
    if value == N::default() { fallback } else { value }
}

/// Compose the capture filter expression.
///
/// The base expression (or `ip`) is AND-ed with the whitelist as one
/// OR-group, one `not net` clause per blacklist entry, and OR-groups for
/// source and destination ports.
///
/// # Examples
///
/// ```rust
/// use capture_config_agent::core::CaptureConfig;
/// use capture_config_agent::render::bpf_filter;
///
/// let mut cfg = CaptureConfig::default();
/// cfg.filter.ip_whitelist = vec!["10.0.0.0/8".to_string()];
/// cfg.filter.dst_ports = vec![53, 443];
/// assert_eq!(
///     bpf_filter(&cfg),
///     "ip and (net 10.0.0.0/8) and (dst port 53 or dst port 443)"
/// );
/// ```
pub fn bpf_filter(config: &CaptureConfig) -> String {
    let filter = &config.filter;
    let mut parts = Vec::new();

    if filter.bpf_filter.is_empty() {
        parts.push("ip".to_string());
    } else {
        parts.push(format!("({})", filter.bpf_filter));
    }

    if !filter.ip_whitelist.is_empty() {
        parts.push(any_of(filter.ip_whitelist.iter().map(|ip| format!("net {}", ip))));
    }

    parts.extend(filter.ip_blacklist.iter().map(|ip| format!("not net {}", ip)));

    if !filter.src_ports.is_empty() {
        parts.push(any_of(filter.src_ports.iter().map(|p| format!("src port {}", p))));
    }
    if !filter.dst_ports.is_empty() {
        parts.push(any_of(filter.dst_ports.iter().map(|p| format!("dst port {}", p))));
    }

    parts.join(" and ")
}

fn any_of(clauses: impl Iterator<Item = String>) -> String {
    format!("({})", clauses.collect::<Vec<_>>().join(" or "))
}

/// Quote a value as a Lua string literal.
fn lua_str(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Lines of a header comment must not break out of the comment.
fn comment(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

pub(super) fn render(
    values: &RenderValues,
    generated_at: &str,
    cluster: &str,
    node_id: &str,
) -> String {
    let mut out = String::with_capacity(2048);
    // Writing into a String cannot fail.
    let _ = write_artifact(&mut out, values, generated_at, cluster, node_id);
    out
}

fn write_artifact(
    out: &mut String,
    v: &RenderValues,
    generated_at: &str,
    cluster: &str,
    node_id: &str,
) -> std::fmt::Result {
    writeln!(out, "-- ========= YAF configuration (generated, do not edit) =========")?;
    writeln!(out, "-- Generated: {}", comment(generated_at))?;
    writeln!(out, "-- Cluster: {}", comment(cluster))?;
    writeln!(out, "-- Node: {}", comment(node_id))?;
    writeln!(out)?;

    writeln!(out, "input = {{")?;
    writeln!(out, "  type = \"pcap\",")?;
    writeln!(out, "  inf  = {},", lua_str(&v.interface))?;
    writeln!(out, "  export_interface = true,")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "output = {{")?;
    writeln!(out, "  host     = \"127.0.0.1\",")?;
    writeln!(out, "  port     = \"{}\",", v.ipfix_port)?;
    writeln!(out, "  protocol = \"tcp\",")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "decode = {{")?;
    writeln!(out, "  ip4_only = false,")?;
    writeln!(out, "  ip6_only = false,")?;
    writeln!(out, "  nofrag   = false,")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "export = {{")?;
    writeln!(out, "  silk       = true,")?;
    writeln!(out, "  uniflow    = true,")?;
    writeln!(out, "  flow_stats = true,")?;
    writeln!(out, "  mac        = true,")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "-- flow timeouts (seconds)")?;
    writeln!(out, "idle_timeout   = {}", v.idle_timeout)?;
    writeln!(out, "active_timeout = {}", v.active_timeout)?;
    writeln!(out)?;

    writeln!(out, "filter = {}", lua_str(&v.filter))?;
    writeln!(out)?;

    writeln!(out, "applabel   = {}", v.app_label)?;
    writeln!(out, "dpi        = {}", v.dpi)?;
    writeln!(out, "maxpayload = {}", v.max_payload)?;
    writeln!(out, "maxexport  = {}", v.max_payload)?;
    writeln!(out, "udp_payload = true")?;
    writeln!(out, "stats       = {}", v.stats_interval)?;
    writeln!(out)?;

    writeln!(out, "-- ========= processor settings =========")?;
    writeln!(out, "processor = {{")?;
    writeln!(out, "  rotate_interval_sec = 60,")?;
    writeln!(out, "  rotate_size_mb      = 100,")?;
    writeln!(out, "  file_prefix         = \"flows_\",")?;
    writeln!(out, "  timezone            = \"Asia/Shanghai\",")?;
    writeln!(out, "  output_type         = \"file\",")?;
    writeln!(out)?;
    writeln!(out, "  output_fields = {{")?;
    for field in &v.output_fields {
        writeln!(out, "    {},", lua_str(field))?;
    }
    writeln!(out, "  }},")?;
    writeln!(out)?;
    writeln!(out, "  status_report_url = {},", lua_str(&v.status_report_url))?;
    writeln!(out, "  status_report_interval_sec = {},", v.status_report_interval_sec)?;
    if !v.uuid.is_empty() {
        writeln!(out, "  uuid = {},", lua_str(&v.uuid))?;
    }
    writeln!(out, "}}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults_to_ip() {
        let cfg = CaptureConfig::default();
        assert_eq!(bpf_filter(&cfg), "ip");
    }

    #[test]
    fn test_filter_full_composition() {
        let mut cfg = CaptureConfig::default();
        cfg.filter.bpf_filter = "tcp".to_string();
        cfg.filter.ip_whitelist = vec!["10.0.0.0/8".to_string(), "192.168.1.0/24".to_string()];
        cfg.filter.ip_blacklist = vec!["10.1.0.0/16".to_string(), "10.2.0.0/16".to_string()];
        cfg.filter.src_ports = vec![22];
        cfg.filter.dst_ports = vec![80, 443];

        assert_eq!(
            bpf_filter(&cfg),
            "(tcp) and (net 10.0.0.0/8 or net 192.168.1.0/24) and not net 10.1.0.0/16 \
             and not net 10.2.0.0/16 and (src port 22) and (dst port 80 or dst port 443)"
        );
    }

    #[test]
    fn test_renderer_defaulting_pass() {
        let values = RenderValues::from_config(&CaptureConfig::default());
        assert_eq!(values.interface, "eth0");
        assert_eq!(values.ipfix_port, 18000);
        assert_eq!(values.idle_timeout, 60);
        assert_eq!(values.active_timeout, 60);
        assert_eq!(values.stats_interval, 300);
        assert_eq!(values.status_report_interval_sec, 60);
        assert_eq!(values.output_fields.len(), DEFAULT_OUTPUT_FIELDS.len());
        // max_payload has no renderer default.
        assert_eq!(values.max_payload, 0);
    }

    #[test]
    fn test_lua_quoting() {
        assert_eq!(lua_str(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(lua_str("x\ny"), r#""x\ny""#);
    }

    #[test]
    fn test_uuid_rendered_when_set() {
        let mut values = RenderValues::from_config(&CaptureConfig::defaults());
        values.uuid = "probe-7".to_string();
        let text = render(&values, "now", "c", "n");
        assert!(text.contains(r#"  uuid = "probe-7","#));
    }
}
