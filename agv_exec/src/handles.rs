//! # Robot Handles
//!
//! The client is hardware-agnostic. Each robot type supplies two handles: a command handle the
//! client drives when requests arrive, and a status handle the client reads when assembling the
//! state it publishes. The simulated robot in [`crate::sim`] implements both.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use fleet_if::msgs::{Location, RobotMode, Waypoint};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Invoked by the driver when the task it was handed has finished.
///
/// Completion callbacks may fire from the driver's own context at any time, including after the
/// client that created them has been torn down, in which case they have no effect.
pub type RequestCompleted = Box<dyn FnOnce() + Send>;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Commands the client can issue to the robot.
///
/// None of these may block. Commands which take time to execute accept a completion callback
/// instead.
pub trait CommandHandle: Send {
    /// Stop the robot in place.
    fn stop(&mut self);

    /// Resume whatever the robot was doing before it was stopped.
    fn resume(&mut self);

    /// Dock at the named dock.
    fn dock(&mut self, dock_name: &str, on_complete: RequestCompleted);

    /// Abandon any current path and follow the given one.
    fn follow_new_path(&mut self, path: &[Waypoint], on_complete: RequestCompleted);

    /// Reset the robot's localisation estimate to the given location.
    fn relocalize(&mut self, location: &Location, on_complete: RequestCompleted);
}

/// Live status of the robot, read on every client tick.
pub trait StatusHandle: Send {
    /// Current operating mode.
    fn mode(&self) -> RobotMode;

    /// Battery charge fraction in [0, 1].
    fn battery_percent(&self) -> f64;

    /// Current location in the robot's frame.
    fn location(&self) -> Location;

    /// Index into the current path of the waypoint being driven towards, negative if the robot
    /// has no target.
    fn target_path_waypoint_index(&self) -> i64;
}
