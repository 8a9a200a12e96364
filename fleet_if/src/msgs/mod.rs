//! # Wire Messages
//!
//! This module defines the messages exchanged between the robot clients and
//! the fleet manager. Clients publish [`RobotState`] upstream, the manager
//! publishes [`requests`] downstream. All messages are serialised as JSON by
//! the standard middlewares, but nothing in here depends on the encoding.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod requests;

// Re-export the request types so users don't have to reach into the submodule
pub use requests::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier of a single task issued by the fleet manager.
///
/// Task ids are allocated by the manager and are strictly increasing for the
/// lifetime of a manager instance. The value `0` is reserved to mean "no
/// active task" and is never allocated.
pub type TaskId = u32;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A position and heading on a named level (floor) of the facility.
///
/// Locations are expressed either in the fleet frame (manager side) or in the
/// robot's own frame (robot side), with the manager's coordinate transform
/// bridging the two.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    /// Name of the level the location is on
    pub level_name: String,

    /// X coordinate in meters
    pub x: f64,

    /// Y coordinate in meters
    pub y: f64,

    /// Heading in radians
    pub yaw_rad: f64
}

/// A single waypoint along a navigation path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Waypoint {
    /// Index of the corresponding waypoint in the navigation graph
    pub index: u32,

    /// Location of the waypoint
    pub location: Location
}

/// State published by a robot client on every tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RobotState {
    /// Name of the robot, unique within the fleet
    pub name: String,

    /// Model of the robot
    pub model: String,

    /// Id of the task the robot is currently executing, `0` if none
    pub task_id: TaskId,

    /// Current operating mode of the robot
    pub mode: RobotMode,

    /// Battery charge fraction, in the range [0, 1]
    pub battery_percent: f64,

    /// Current location of the robot, in the robot's frame
    pub location: Location,

    /// Index into the current navigation path of the waypoint the robot is
    /// driving towards, `None` if the robot has no target
    pub target_path_waypoint_index: Option<u32>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Operating modes a robot can report.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RobotMode {
    Idle,
    Moving,
    Paused,
    Charging,
    Docking,
    Emergency,
    AdapterError,
    Cleaning,
    Unknown
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Location {
    /// Create a new location on the given level.
    pub fn new(level_name: &str, x: f64, y: f64, yaw_rad: f64) -> Self {
        Self {
            level_name: level_name.to_owned(),
            x,
            y,
            yaw_rad
        }
    }
}

impl Default for RobotMode {
    fn default() -> Self {
        RobotMode::Unknown
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_robot_state_json_round_trip() {
        let state = RobotState {
            name: "agv_01".into(),
            model: "mk2".into(),
            task_id: 7,
            mode: RobotMode::Moving,
            battery_percent: 0.83,
            location: Location::new("ground", 1.5, -2.0, 0.25),
            target_path_waypoint_index: Some(3)
        };

        let json = serde_json::to_string(&state).unwrap();
        let parsed: RobotState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_no_target_serialises_as_null() {
        let state = RobotState {
            name: "agv_01".into(),
            model: "mk2".into(),
            task_id: 0,
            mode: RobotMode::Idle,
            battery_percent: 1.0,
            location: Location::new("ground", 0.0, 0.0, 0.0),
            target_path_waypoint_index: None
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"target_path_waypoint_index\":null"));
    }
}
