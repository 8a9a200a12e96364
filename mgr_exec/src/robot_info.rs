//! # Robot Info
//!
//! The manager keeps one [`RobotInfo`] per robot it has ever heard from. Each incoming
//! [`RobotState`] is validated and then reconciled against the navigation graph to estimate where
//! the robot is relative to the graph: sitting on a waypoint, travelling along a lane, heading
//! towards a waypoint of its current navigation path, or lost.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Deserialize;
use std::time::Instant;

// Internal
use crate::graph::NavGraph;
use fleet_if::msgs::{NavigationRequest, RobotMode, RobotState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the manager knows about one robot.
///
/// The embedded state's location is in the fleet frame, the manager transforms incoming states
/// before they get here.
#[derive(Debug, Clone)]
pub struct RobotInfo {
    /// Name of the robot, unique within the fleet
    pub name: String,

    /// Model of the robot
    pub model: String,

    /// When the robot was first heard from
    pub first_seen: Instant,

    /// When the robot was last heard from
    pub last_updated: Instant,

    /// The most recent state received from the robot, in the fleet frame
    pub state: RobotState,

    /// Current operating mode of the robot
    pub mode: RobotMode,

    /// Where the robot is relative to the navigation graph
    pub tracking: TrackingState,

    /// The most recent navigation request successfully issued to this robot, used to name the
    /// target waypoint while the robot is between waypoints and lanes
    pub last_nav_request: Option<NavigationRequest>
}

/// Distance thresholds used when reconciling a reported location against the graph.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrackingThresholds {
    /// A robot within this distance of a waypoint is considered to be on it
    #[serde(default = "TrackingThresholds::default_waypoint_m")]
    pub waypoint_m: f64,

    /// A robot within this distance of a lane it projects onto is considered to be on it
    #[serde(default = "TrackingThresholds::default_lane_m")]
    pub lane_m: f64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The manager's estimate of where a robot is relative to the navigation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// The robot is on the waypoint with this graph index
    OnWaypoint(usize),

    /// The robot is on the lane with this graph index
    OnLane(usize),

    /// The robot is between graph features, heading for the waypoint with this graph index
    TowardsWaypoint(usize),

    /// The robot cannot be related to the graph
    Lost
}

/// Reasons an incoming robot state is rejected.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("The robot state has an empty name")]
    EmptyName,

    #[error("The state is for robot {0} but this record tracks robot {1}")]
    NameMismatch(String, String),

    #[error("Battery fraction {0} is outside [0, 1]")]
    BatteryOutOfRange(f64),

    #[error("Level {0} does not exist in the navigation graph")]
    UnknownLevel(String)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotInfo {

    /// Create the record for a robot heard from for the first time.
    pub fn make(
        state: RobotState,
        graph: &NavGraph,
        thresholds: &TrackingThresholds,
        now: Instant
    ) -> Result<Self, StateError> {
        validate_state(&state, graph)?;

        let mut info = Self {
            name: state.name.clone(),
            model: state.model.clone(),
            first_seen: now,
            last_updated: now,
            mode: state.mode,
            tracking: TrackingState::Lost,
            last_nav_request: None,
            state
        };
        info.tracking = info.track(graph, thresholds);

        Ok(info)
    }

    /// Apply a newly received state to this record.
    ///
    /// If the state fails validation the record is left untouched and the error describes the
    /// reason.
    pub fn update(
        &mut self,
        state: RobotState,
        graph: &NavGraph,
        thresholds: &TrackingThresholds,
        now: Instant
    ) -> Result<(), StateError> {
        validate_state(&state, graph)?;
        if state.name != self.name {
            return Err(StateError::NameMismatch(state.name, self.name.clone()))
        }

        self.mode = state.mode;
        self.state = state;
        self.last_updated = now;
        self.tracking = self.track(graph, thresholds);

        Ok(())
    }

    /// Record a navigation request issued to this robot, so tracking can later name the target.
    pub fn set_nav_request(&mut self, request: NavigationRequest) {
        self.last_nav_request = Some(request);
    }

    /// Seconds since the robot last reported a state.
    pub fn seconds_since_update(&self, now: Instant) -> f64 {
        now.duration_since(self.last_updated).as_secs_f64()
    }

    /// Reconcile the current state's location against the graph.
    ///
    /// The rules are applied in priority order:
    ///   1. on a same-level waypoint within the waypoint threshold (nearest wins),
    ///   2. on a lane it projects onto within the lane threshold (closest lane wins),
    ///   3. executing a known navigation task, so heading towards that task's target,
    ///   4. lost.
    fn track(&self, graph: &NavGraph, thresholds: &TrackingThresholds) -> TrackingState {
        let coordinates = Vector2::new(self.state.location.x, self.state.location.y);

        // Rule 1 - nearest same-level waypoint within threshold
        let mut nearest_wp: Option<(usize, f64)> = None;
        for i in 0..graph.num_waypoints() {
            let wp = graph.waypoint(i).expect("waypoint index in range");
            if wp.level_name != self.state.location.level_name {
                continue;
            }

            let dist = (coordinates - wp.position_m).norm();
            if dist > thresholds.waypoint_m {
                continue;
            }

            match nearest_wp {
                Some((_, nearest_dist)) if dist >= nearest_dist => (),
                _ => nearest_wp = Some((i, dist))
            }
        }
        if let Some((index, _)) = nearest_wp {
            return TrackingState::OnWaypoint(index)
        }

        // Rule 2 - closest lane the location projects onto, within threshold
        let mut closest_lane: Option<(usize, f64)> = None;
        for i in 0..graph.num_lanes() {
            let within = graph
                .is_within_lane(i, &coordinates)
                .expect("lane index in range");
            if !within {
                continue;
            }

            let dist = graph
                .distance_to_lane(i, &coordinates)
                .expect("lane index in range");
            if dist > thresholds.lane_m {
                continue;
            }

            match closest_lane {
                Some((_, closest_dist)) if dist >= closest_dist => (),
                _ => closest_lane = Some((i, dist))
            }
        }
        if let Some((index, _)) = closest_lane {
            return TrackingState::OnLane(index)
        }

        // Rule 3 - executing a navigation task we know about
        if self.state.task_id != 0 {
            if let Some(ref nav) = self.last_nav_request {
                if nav.task_id == self.state.task_id {
                    if let Some(target) = nav_target_index(nav, &self.state) {
                        return TrackingState::TowardsWaypoint(target)
                    }
                }
            }
        }

        // Rule 4
        TrackingState::Lost
    }
}

impl Default for TrackingThresholds {
    fn default() -> Self {
        Self {
            waypoint_m: Self::default_waypoint_m(),
            lane_m: Self::default_lane_m()
        }
    }
}

impl TrackingThresholds {
    fn default_waypoint_m() -> f64 {
        0.5
    }

    fn default_lane_m() -> f64 {
        1.0
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check an incoming state against the fleet's validity rules.
fn validate_state(state: &RobotState, graph: &NavGraph) -> Result<(), StateError> {
    if state.name.is_empty() {
        return Err(StateError::EmptyName)
    }
    if !(0.0..=1.0).contains(&state.battery_percent) {
        return Err(StateError::BatteryOutOfRange(state.battery_percent))
    }
    if !graph.has_level(&state.location.level_name) {
        return Err(StateError::UnknownLevel(state.location.level_name.clone()))
    }

    Ok(())
}

/// The graph index of the waypoint a navigating robot is heading for.
///
/// Uses the robot's reported index into the path where available, otherwise falls back to the end
/// of the path.
fn nav_target_index(nav: &NavigationRequest, state: &RobotState) -> Option<usize> {
    let path_target = match state.target_path_waypoint_index {
        Some(i) => nav.path.get(i as usize).or_else(|| nav.path.last()),
        None => nav.path.last()
    };

    path_target.map(|wp| wp.index as usize)
}
