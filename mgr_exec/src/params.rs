//! Manager executable parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::manager::DEFAULT_RELOCALIZATION_THRESHOLD_M;
use crate::robot_info::TrackingThresholds;
use crate::transform::TransformParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the manager executable
#[derive(Debug, Clone, Deserialize)]
pub struct MgrExecParams {
    /// Name of the fleet this manager runs
    pub fleet_name: String,

    /// Endpoint the state SUB socket binds to
    pub state_endpoint: String,

    /// Endpoint the request PUB socket binds to
    pub request_endpoint: String,

    /// Frequency of the manager loop in hertz
    pub cycle_frequency_hz: u32,

    /// Path to the navigation graph parameter file, relative to the working directory
    pub graph_file: String,

    /// Robot frame to fleet frame transform
    pub transform: TransformParams,

    /// Tracking reconciliation thresholds
    #[serde(default)]
    pub tracking: TrackingThresholds,

    /// Limit on the waypoint-to-location distance accepted for relocalization requests
    #[serde(default = "default_relocalization_threshold_m")]
    pub relocalization_threshold_m: f64
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_relocalization_threshold_m() -> f64 {
    DEFAULT_RELOCALIZATION_THRESHOLD_M
}
