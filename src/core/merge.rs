//! Layer merging.
//!
//! Layers are applied lowest precedence first, each overriding the
//! accumulated result field by field:
//!
//! - numbers override only when non-zero
//! - strings override only when non-empty
//! - flags are OR-ed, so a later layer can never switch one off
//! - lists are replaced wholesale when the overlay list is non-empty

use crate::core::model::{
    CaptureConfig, CaptureParams, FilterConfig, OutputConfig, StatusReportConfig,
};

/// Resolves the compiled-in default and the three scope layers into one
/// configuration.
///
/// Resolution is total and deterministic; an absent layer behaves exactly
/// like a layer with every field unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMerger;

impl ConfigMerger {
    /// Resolve `default`, then `global`, `cluster` and `node` in that order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use capture_config_agent::core::{CaptureConfig, ConfigMerger};
    ///
    /// let mut node = CaptureConfig::default();
    /// node.capture.interface = "eth3".to_string();
    ///
    /// let merged = ConfigMerger::resolve(&CaptureConfig::defaults(), None, None, Some(&node));
    /// assert_eq!(merged.capture.interface, "eth3");
    /// assert_eq!(merged.capture.ipfix_port, 18000);
    /// ```
    pub fn resolve(
        default: &CaptureConfig,
        global: Option<&CaptureConfig>,
        cluster: Option<&CaptureConfig>,
        node: Option<&CaptureConfig>,
    ) -> CaptureConfig {
        [global, cluster, node]
            .into_iter()
            .flatten()
            .fold(default.clone(), |acc, layer| Self::merge(&acc, layer))
    }

    /// Apply a single overlay on top of `base`.
    pub fn merge(base: &CaptureConfig, overlay: &CaptureConfig) -> CaptureConfig {
        CaptureConfig {
            capture: merge_capture(&base.capture, &overlay.capture),
            filter: merge_filter(&base.filter, &overlay.filter),
            output: OutputConfig {
                fields: list(&base.output.fields, &overlay.output.fields),
            },
            status_report: merge_status_report(&base.status_report, &overlay.status_report),
        }
    }
}

fn merge_capture(base: &CaptureParams, overlay: &CaptureParams) -> CaptureParams {
    CaptureParams {
        interface: string(&base.interface, &overlay.interface),
        ipfix_port: number(base.ipfix_port, overlay.ipfix_port),
        idle_timeout: number(base.idle_timeout, overlay.idle_timeout),
        active_timeout: number(base.active_timeout, overlay.active_timeout),
        stats_interval: number(base.stats_interval, overlay.stats_interval),
        enable_app_label: base.enable_app_label || overlay.enable_app_label,
        enable_dpi: base.enable_dpi || overlay.enable_dpi,
        max_payload: number(base.max_payload, overlay.max_payload),
    }
}

fn merge_filter(base: &FilterConfig, overlay: &FilterConfig) -> FilterConfig {
    FilterConfig {
        ip_whitelist: list(&base.ip_whitelist, &overlay.ip_whitelist),
        ip_blacklist: list(&base.ip_blacklist, &overlay.ip_blacklist),
        src_ports: list(&base.src_ports, &overlay.src_ports),
        dst_ports: list(&base.dst_ports, &overlay.dst_ports),
        bpf_filter: string(&base.bpf_filter, &overlay.bpf_filter),
    }
}

fn merge_status_report(
    base: &StatusReportConfig,
    overlay: &StatusReportConfig,
) -> StatusReportConfig {
    StatusReportConfig {
        status_report_url: string(&base.status_report_url, &overlay.status_report_url),
        status_report_interval_sec: number(
            base.status_report_interval_sec,
            overlay.status_report_interval_sec,
        ),
        uuid: string(&base.uuid, &overlay.uuid),
    }
}

fn number<N: Copy + Default + PartialEq>(base: N, overlay: N) -> N {
    if overlay == N::default() { base } else { overlay }
}

fn string(base: &str, overlay: &str) -> String {
    (if overlay.is_empty() { base } else { overlay }).to_string()
}

fn list<T: Clone>(base: &[T], overlay: &[T]) -> Vec<T> {
    (if overlay.is_empty() { base } else { overlay }).to_vec()
}
