//! # Request Messages
//!
//! Requests are issued by the fleet manager and executed by the robot
//! clients. Every request is addressed to a single robot by name and carries
//! the task id allocated for it by the manager.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{Location, TaskId, Waypoint};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Request for the robot to stop in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PauseRequest {
    /// Name of the robot the request is addressed to
    pub robot_name: String,

    /// Task id allocated for this request
    pub task_id: TaskId
}

/// Request for the robot to resume whatever it was doing before it paused.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResumeRequest {
    /// Name of the robot the request is addressed to
    pub robot_name: String,

    /// Task id allocated for this request
    pub task_id: TaskId
}

/// Request for the robot to perform a docking procedure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DockRequest {
    /// Name of the robot the request is addressed to
    pub robot_name: String,

    /// Task id allocated for this request
    pub task_id: TaskId,

    /// Name of the dock the robot should attach to
    pub dock_name: String
}

/// Request for the robot to follow a new navigation path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    /// Name of the robot the request is addressed to
    pub robot_name: String,

    /// Task id allocated for this request
    pub task_id: TaskId,

    /// Ordered waypoints the robot should visit, in the robot's frame
    pub path: Vec<Waypoint>
}

/// Request for the robot to reset its localisation estimate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelocalizationRequest {
    /// Name of the robot the request is addressed to
    pub robot_name: String,

    /// Task id allocated for this request
    pub task_id: TaskId,

    /// The corrected location of the robot, in the robot's frame
    pub location: Location,

    /// Index of the graph waypoint the robot last visited
    pub last_visited_waypoint_index: u32
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Any request, as carried on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Request {
    Pause(PauseRequest),
    Resume(ResumeRequest),
    Dock(DockRequest),
    Navigation(NavigationRequest),
    Relocalization(RelocalizationRequest)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Request {
    /// Name of the robot this request is addressed to.
    pub fn robot_name(&self) -> &str {
        match self {
            Request::Pause(r) => &r.robot_name,
            Request::Resume(r) => &r.robot_name,
            Request::Dock(r) => &r.robot_name,
            Request::Navigation(r) => &r.robot_name,
            Request::Relocalization(r) => &r.robot_name
        }
    }

    /// Task id carried by this request.
    pub fn task_id(&self) -> TaskId {
        match self {
            Request::Pause(r) => r.task_id,
            Request::Resume(r) => r.task_id,
            Request::Dock(r) => r.task_id,
            Request::Navigation(r) => r.task_id,
            Request::Relocalization(r) => r.task_id
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = Request::Dock(DockRequest {
            robot_name: "agv_01".into(),
            task_id: 12,
            dock_name: "charger_east".into()
        });

        let json = serde_json::to_string(&request).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.robot_name(), "agv_01");
        assert_eq!(parsed.task_id(), 12);
    }
}
