//! # Simulated Robot
//!
//! The SimRobot stands in for real hardware so the client (and a whole fleet) can be run and
//! tested without robots. A background thread steps a simple kinematic model at a fixed rate:
//! the robot drives along commanded paths at constant speed, docks on a timer, relocalizes
//! instantly and slowly drains its battery.
//!
//! The robot splits into a command half and a status half, which plug straight into the client.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Internal
use crate::handles::{CommandHandle, RequestCompleted, StatusHandle};
use fleet_if::msgs::{Location, RobotMode, Waypoint};
use util::maths::{clamp, norm};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Tuning parameters for the simulated robot.
#[derive(Debug, Clone, Deserialize)]
pub struct SimParams {
    /// Level the robot starts on
    pub start_level_name: String,

    /// Starting X coordinate in meters
    pub start_x_m: f64,

    /// Starting Y coordinate in meters
    pub start_y_m: f64,

    /// Starting heading in radians
    pub start_yaw_rad: f64,

    /// Driving speed in meters per second
    pub speed_ms: f64,

    /// How long a docking procedure takes
    pub dock_duration_s: f64,

    /// Starting battery charge fraction
    pub battery_start: f64,

    /// Battery drain in charge fraction per second
    pub battery_drain_per_s: f64,

    /// Rate the kinematic model is stepped at
    pub step_frequency_hz: u32
}

/// The simulated robot. Owns the background stepping thread.
pub struct SimRobot {
    state: Arc<Mutex<SimState>>,
    bg_run: Arc<AtomicBool>,
    bg_jh: Option<JoinHandle<()>>
}

/// Command half of the simulated robot, plugs into the client as its driver.
pub struct SimCommands {
    state: Arc<Mutex<SimState>>,
    dock_duration_s: f64
}

/// Status half of the simulated robot, plugs into the client as its status source.
pub struct SimStatus {
    state: Arc<Mutex<SimState>>
}

/// The model state shared between the stepping thread and the handles.
struct SimState {
    mode: RobotMode,
    battery: f64,
    location: Location,

    /// The path currently being followed, in the robot's frame
    path: Vec<Waypoint>,

    /// Index into `path` of the waypoint being driven towards
    target_index: Option<usize>,

    paused: bool,

    /// Seconds of docking remaining, if a dock is in progress
    dock_remaining_s: Option<f64>,

    /// Completion callback for the task in progress
    on_complete: Option<RequestCompleted>
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimRobot {

    /// Create a new simulated robot and start its stepping thread.
    pub fn new(params: &SimParams) -> Self {
        let state = Arc::new(Mutex::new(SimState {
            mode: RobotMode::Idle,
            battery: params.battery_start,
            location: Location::new(
                &params.start_level_name,
                params.start_x_m,
                params.start_y_m,
                params.start_yaw_rad
            ),
            path: Vec::new(),
            target_index: None,
            paused: false,
            dock_remaining_s: None,
            on_complete: None
        }));
        let bg_run = Arc::new(AtomicBool::new(true));

        let state_clone = state.clone();
        let bg_run_clone = bg_run.clone();
        let params_clone = params.clone();

        let bg_jh = Some(thread::spawn(move || {
            bg_thread(state_clone, bg_run_clone, params_clone)
        }));

        Self {
            state,
            bg_run,
            bg_jh
        }
    }

    /// Split off the two handles the client needs.
    pub fn handles(&self, params: &SimParams) -> (SimCommands, SimStatus) {
        (
            SimCommands {
                state: self.state.clone(),
                dock_duration_s: params.dock_duration_s
            },
            SimStatus {
                state: self.state.clone()
            }
        )
    }
}

impl Drop for SimRobot {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            jh.join().ok();
        }
    }
}

impl CommandHandle for SimCommands {
    fn stop(&mut self) {
        let mut state = lock_state(&self.state);
        state.paused = true;
    }

    fn resume(&mut self) {
        let mut state = lock_state(&self.state);
        state.paused = false;
    }

    fn dock(&mut self, _dock_name: &str, on_complete: RequestCompleted) {
        let mut state = lock_state(&self.state);
        state.paused = false;
        state.path.clear();
        state.target_index = None;
        state.dock_remaining_s = Some(self.dock_duration_s);
        state.mode = RobotMode::Docking;

        // Any previous task has been supplanted, its completion never fires
        state.on_complete = Some(on_complete);
    }

    fn follow_new_path(&mut self, path: &[Waypoint], on_complete: RequestCompleted) {
        let mut state = lock_state(&self.state);
        state.paused = false;
        state.dock_remaining_s = None;
        state.path = path.to_vec();
        state.target_index = if path.is_empty() { None } else { Some(0) };
        state.mode = RobotMode::Moving;
        state.on_complete = Some(on_complete);
    }

    fn relocalize(&mut self, location: &Location, on_complete: RequestCompleted) {
        {
            let mut state = lock_state(&self.state);
            state.location = location.clone();
        }

        // Relocalization is instantaneous in the simulation
        on_complete();
    }
}

impl StatusHandle for SimStatus {
    fn mode(&self) -> RobotMode {
        lock_state(&self.state).mode
    }

    fn battery_percent(&self) -> f64 {
        lock_state(&self.state).battery
    }

    fn location(&self) -> Location {
        lock_state(&self.state).location.clone()
    }

    fn target_path_waypoint_index(&self) -> i64 {
        match lock_state(&self.state).target_index {
            Some(index) => index as i64,
            None => -1
        }
    }
}

impl SimState {

    /// Advance the model by `dt_s` seconds.
    ///
    /// Any completion callback due is returned rather than invoked, so the caller can fire it
    /// after releasing the state lock.
    fn step(&mut self, dt_s: f64, params: &SimParams) -> Option<RequestCompleted> {
        self.battery = clamp(
            &(self.battery - params.battery_drain_per_s * dt_s),
            &0.0,
            &1.0
        );

        if self.paused {
            self.mode = RobotMode::Paused;
            return None
        }

        // Docking takes priority over driving
        if let Some(remaining_s) = self.dock_remaining_s {
            let remaining_s = remaining_s - dt_s;
            if remaining_s <= 0.0 {
                self.dock_remaining_s = None;
                self.mode = RobotMode::Charging;
                return self.on_complete.take()
            }

            self.dock_remaining_s = Some(remaining_s);
            self.mode = RobotMode::Docking;
            return None
        }

        // Drive towards the current target waypoint, if there is one
        if let Some(target_index) = self.target_index {
            let target = match self.path.get(target_index) {
                Some(wp) => wp.location.clone(),
                None => {
                    // Defensive, a command should never leave the index dangling
                    self.target_index = None;
                    return None
                }
            };

            let dist_m = norm(
                &[self.location.x, self.location.y],
                &[target.x, target.y]
            )
            .expect("points are both 2D");
            let step_m = params.speed_ms * dt_s;

            if dist_m <= step_m {
                // Waypoint reached, move onto the next one or finish the path
                self.location.x = target.x;
                self.location.y = target.y;
                self.location.level_name = target.level_name;

                if target_index + 1 >= self.path.len() {
                    self.path.clear();
                    self.target_index = None;
                    self.mode = RobotMode::Idle;
                    return self.on_complete.take()
                }

                self.target_index = Some(target_index + 1);
                self.mode = RobotMode::Moving;
                return None
            }

            let dx = target.x - self.location.x;
            let dy = target.y - self.location.y;
            self.location.x += dx / dist_m * step_m;
            self.location.y += dy / dist_m * step_m;
            self.location.yaw_rad = dy.atan2(dx);
            self.mode = RobotMode::Moving;
            return None
        }

        // Nothing to do. A robot left on a dock keeps charging.
        if self.mode != RobotMode::Charging {
            self.mode = RobotMode::Idle;
        }
        None
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock_state(state: &Arc<Mutex<SimState>>) -> std::sync::MutexGuard<SimState> {
    state.lock().expect("SimRobot state mutex poisoned")
}

/// Background thread stepping the kinematic model at the configured rate.
fn bg_thread(state: Arc<Mutex<SimState>>, run: Arc<AtomicBool>, params: SimParams) {
    let period = Duration::from_secs_f64(1.0 / params.step_frequency_hz as f64);
    let mut last_step = Instant::now();

    while run.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        // Step with the measured dt so slow cycles don't slow the robot down
        let dt_s = cycle_start.duration_since(last_step).as_secs_f64();
        last_step = cycle_start;

        let completed = lock_state(&state).step(dt_s, &params);

        // Fire any completion outside the state lock
        if let Some(on_complete) = completed {
            on_complete();
        }

        if let Some(remaining) = period.checked_sub(cycle_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_params() -> SimParams {
        SimParams {
            start_level_name: "test_level".into(),
            start_x_m: 0.0,
            start_y_m: 0.0,
            start_yaw_rad: 0.0,
            speed_ms: 100.0,
            dock_duration_s: 0.05,
            battery_start: 1.0,
            battery_drain_per_s: 0.0,
            step_frequency_hz: 100
        }
    }

    fn waypoint(index: u32, x: f64, y: f64) -> Waypoint {
        Waypoint {
            index,
            location: Location::new("test_level", x, y, 0.0)
        }
    }

    /// Poll until the condition holds or the deadline passes.
    fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "Timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_path_following_completes() {
        let params = test_params();
        let robot = SimRobot::new(&params);
        let (mut commands, status) = robot.handles(&params);

        let completed = Arc::new(AtomicBool::new(false));
        let completed_flag = completed.clone();

        commands.follow_new_path(
            &[waypoint(0, 5.0, 0.0), waypoint(1, 5.0, 5.0)],
            Box::new(move || completed_flag.store(true, Ordering::Relaxed))
        );

        wait_for(|| completed.load(Ordering::Relaxed), "path completion");
        wait_for(|| status.mode() == RobotMode::Idle, "idle mode");

        let location = status.location();
        assert!((location.x - 5.0).abs() < 1e-9);
        assert!((location.y - 5.0).abs() < 1e-9);
        assert_eq!(status.target_path_waypoint_index(), -1);
    }

    #[test]
    fn test_stop_freezes_the_robot() {
        let params = test_params();
        let robot = SimRobot::new(&params);
        let (mut commands, status) = robot.handles(&params);

        commands.follow_new_path(&[waypoint(0, 1000.0, 0.0)], Box::new(|| {}));
        wait_for(|| status.mode() == RobotMode::Moving, "moving mode");

        commands.stop();
        wait_for(|| status.mode() == RobotMode::Paused, "paused mode");

        let frozen_at = status.location();
        thread::sleep(Duration::from_millis(50));
        let later = status.location();
        assert_eq!(frozen_at.x, later.x);
        assert_eq!(frozen_at.y, later.y);

        // The target is retained for the eventual resume
        assert_eq!(status.target_path_waypoint_index(), 0);

        commands.resume();
        wait_for(|| status.mode() == RobotMode::Moving, "moving mode after resume");
    }

    #[test]
    fn test_dock_ends_charging() {
        let params = test_params();
        let robot = SimRobot::new(&params);
        let (mut commands, status) = robot.handles(&params);

        let completed = Arc::new(AtomicBool::new(false));
        let completed_flag = completed.clone();

        commands.dock(
            "test_dock",
            Box::new(move || completed_flag.store(true, Ordering::Relaxed))
        );

        wait_for(|| completed.load(Ordering::Relaxed), "dock completion");
        wait_for(|| status.mode() == RobotMode::Charging, "charging mode");
    }

    #[test]
    fn test_relocalize_is_instant() {
        let params = test_params();
        let robot = SimRobot::new(&params);
        let (mut commands, status) = robot.handles(&params);

        let completed = Arc::new(AtomicBool::new(false));
        let completed_flag = completed.clone();

        commands.relocalize(
            &Location::new("test_level", -3.0, 4.0, 1.0),
            Box::new(move || completed_flag.store(true, Ordering::Relaxed))
        );

        assert!(completed.load(Ordering::Relaxed));
        let location = status.location();
        assert!((location.x + 3.0).abs() < 1e-9);
        assert!((location.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_battery_drains() {
        let mut params = test_params();
        params.battery_drain_per_s = 1.0;
        let robot = SimRobot::new(&params);
        let (_commands, status) = robot.handles(&params);

        wait_for(|| status.battery_percent() < 0.9, "battery drain");

        // The battery never leaves [0, 1]
        wait_for(|| status.battery_percent() <= 0.0 + 1e-9, "battery empty");
        assert!(status.battery_percent() >= 0.0);
    }
}
