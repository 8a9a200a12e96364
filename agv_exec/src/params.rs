//! Robot executable parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::sim::SimParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the robot executable
#[derive(Debug, Clone, Deserialize)]
pub struct AgvExecParams {
    /// Name of this robot, unique within the fleet
    pub robot_name: String,

    /// Model of this robot
    pub robot_model: String,

    /// Endpoint the state PUB socket connects to
    pub state_endpoint: String,

    /// Endpoint the request SUB socket connects to
    pub request_endpoint: String,

    /// Frequency of the client loop in hertz
    pub cycle_frequency_hz: u32,

    /// Simulated robot tuning
    pub sim: SimParams
}
