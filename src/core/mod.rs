//! Configuration model, merging, agent settings and the apply coordinator.

mod coordinator;
pub mod merge;
pub mod model;
pub mod settings;

pub use coordinator::{ApplyCoordinator, LayerState, ReconcileOutcome, Resolution};
pub use merge::ConfigMerger;
pub use model::{
    CaptureConfig, CaptureParams, ConfigLayer, DEFAULT_OUTPUT_FIELDS, FilterConfig, LayerScope,
    OutputConfig, StatusReportConfig,
};
pub use settings::{AgentSettings, SettingsLoader, StoreKind};
