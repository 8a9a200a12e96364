//! # Fleet Manager
//!
//! The manager owns the robot registry. Its loop drains robot states from the server middleware,
//! reconciles them against the navigation graph and tells the supervisor about every update. Its
//! request API validates commands, stamps them with a freshly allocated task id and hands them to
//! the middleware for delivery.
//!
//! All mutable state lives in a private record behind a single mutex, shared between the loop,
//! the request API and the worker thread spawned by `start_async`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, warn};
use nalgebra::Vector2;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Internal
use crate::graph::NavGraph;
use crate::robot_info::{RobotInfo, TrackingThresholds};
use crate::transform::CoordinateTransform;
use fleet_if::msgs::{
    DockRequest, Location, NavigationRequest, PauseRequest, RelocalizationRequest, Request,
    ResumeRequest, TaskId, Waypoint,
};
use fleet_if::transport::ServerMiddleware;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default limit on how far a relocalization location may be from the last visited waypoint.
pub const DEFAULT_RELOCALIZATION_THRESHOLD_M: f64 = 10.0;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Clock used to stamp robot updates. Injected so tests can control time.
pub type TimeNow = Box<dyn Fn() -> Instant + Send>;

/// Invoked with a read-only view of a robot's record every time it is updated.
pub type RobotUpdatedCallback = Box<dyn FnMut(&RobotInfo) + Send>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything needed to build a [`Manager`].
pub struct ManagerConfig {
    /// Name of the fleet, must not be empty
    pub fleet_name: String,

    /// The navigation graph, must contain at least one waypoint
    pub graph: NavGraph,

    /// Transport used to reach the robots
    pub middleware: Box<dyn ServerMiddleware>,

    /// Transform between the fleet frame and the robot frame
    pub transform: CoordinateTransform,

    /// Distance thresholds for tracking reconciliation
    pub thresholds: TrackingThresholds,

    /// Limit on the waypoint-to-location distance accepted for relocalization requests
    pub relocalization_threshold_m: f64,

    /// Clock used to stamp robot updates
    pub time_now: TimeNow,

    /// Supervisor callback invoked after every robot update
    pub robot_updated_callback: RobotUpdatedCallback
}

/// The fleet manager's public handle.
///
/// Cheap accessors return snapshots, so holding one never blocks the manager loop for long.
pub struct Manager {
    inner: Arc<Mutex<ManagerInner>>,
    started: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>
}

/// The private record holding all mutable manager state.
struct ManagerInner {
    fleet_name: String,
    graph: NavGraph,
    middleware: Box<dyn ServerMiddleware>,
    transform: CoordinateTransform,
    thresholds: TrackingThresholds,
    relocalization_threshold_m: f64,
    time_now: TimeNow,
    robot_updated_callback: RobotUpdatedCallback,

    /// Registry of every robot ever heard from, keyed (and therefore sorted) by name
    robots: BTreeMap<String, RobotInfo>,

    /// The most recently allocated task id, `0` before the first allocation
    last_task_id: TaskId
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by the manager factory and loop entry points.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("The fleet name must not be empty")]
    EmptyFleetName,

    #[error("The navigation graph must contain at least one waypoint")]
    EmptyGraph,

    #[error("The loop frequency must be greater than 0")]
    InvalidFrequency,

    #[error("The manager has already been started")]
    AlreadyStarted
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Manager {

    /// Build a new manager from the given configuration.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        if config.fleet_name.is_empty() {
            return Err(ManagerError::EmptyFleetName)
        }
        if config.graph.num_waypoints() == 0 {
            return Err(ManagerError::EmptyGraph)
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(ManagerInner {
                fleet_name: config.fleet_name,
                graph: config.graph,
                middleware: config.middleware,
                transform: config.transform,
                thresholds: config.thresholds,
                relocalization_threshold_m: config.relocalization_threshold_m,
                time_now: config.time_now,
                robot_updated_callback: config.robot_updated_callback,
                robots: BTreeMap::new(),
                last_task_id: 0
            })),
            started: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None
        })
    }

    /// Name of the fleet this manager runs.
    pub fn fleet_name(&self) -> String {
        self.lock_inner().fleet_name.clone()
    }

    /// Names of all registered robots, in lexicographic order.
    pub fn robot_names(&self) -> Vec<String> {
        self.lock_inner().robots.keys().cloned().collect()
    }

    /// Snapshot of a single robot's record, `None` if the robot is unknown.
    pub fn robot(&self, robot_name: &str) -> Option<RobotInfo> {
        self.lock_inner().robots.get(robot_name).cloned()
    }

    /// Snapshots of every registered robot.
    pub fn all_robots(&self) -> Vec<RobotInfo> {
        self.lock_inner().robots.values().cloned().collect()
    }

    /// Whether the manager loop has been started.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Request the named robot to pause.
    ///
    /// Returns the allocated task id, or `None` if the request was rejected.
    pub fn request_pause(&self, robot_name: &str) -> Option<TaskId> {
        let mut inner = self.lock_inner();

        if !inner.knows_robot(robot_name) {
            return None
        }

        let task_id = inner.next_task_id();
        inner.send(Request::Pause(PauseRequest {
            robot_name: robot_name.to_owned(),
            task_id
        }));
        Some(task_id)
    }

    /// Request the named robot to resume.
    pub fn request_resume(&self, robot_name: &str) -> Option<TaskId> {
        let mut inner = self.lock_inner();

        if !inner.knows_robot(robot_name) {
            return None
        }

        let task_id = inner.next_task_id();
        inner.send(Request::Resume(ResumeRequest {
            robot_name: robot_name.to_owned(),
            task_id
        }));
        Some(task_id)
    }

    /// Request the named robot to dock at the named dock.
    pub fn request_dock(&self, robot_name: &str, dock_name: &str) -> Option<TaskId> {
        let mut inner = self.lock_inner();

        if !inner.knows_robot(robot_name) {
            return None
        }
        if dock_name.is_empty() {
            warn!("Rejecting dock request for {}: empty dock name", robot_name);
            return None
        }

        let task_id = inner.next_task_id();
        inner.send(Request::Dock(DockRequest {
            robot_name: robot_name.to_owned(),
            task_id,
            dock_name: dock_name.to_owned()
        }));
        Some(task_id)
    }

    /// Request the named robot to follow a new path.
    ///
    /// The path is given in the fleet frame and transformed into the robot frame before it is
    /// sent.
    pub fn request_navigation(
        &self,
        robot_name: &str,
        path: Vec<Waypoint>
    ) -> Option<TaskId> {
        let mut inner = self.lock_inner();

        if !inner.knows_robot(robot_name) {
            return None
        }
        if path.is_empty() {
            warn!("Rejecting navigation request for {}: empty path", robot_name);
            return None
        }
        let num_wps = inner.graph.num_waypoints();
        if let Some(wp) = path.iter().find(|wp| wp.index as usize >= num_wps) {
            warn!(
                "Rejecting navigation request for {}: waypoint index {} is outside the graph \
                ({} waypoints)",
                robot_name, wp.index, num_wps
            );
            return None
        }

        let task_id = inner.next_task_id();

        // Keep the fleet-frame request on the robot's record so tracking can name the target
        // while the robot is between graph features
        let fleet_frame_request = NavigationRequest {
            robot_name: robot_name.to_owned(),
            task_id,
            path: path.clone()
        };
        if let Some(info) = inner.robots.get_mut(robot_name) {
            info.set_nav_request(fleet_frame_request);
        }

        // The robot wants the path in its own frame
        let robot_frame_path = path
            .iter()
            .map(|wp| Waypoint {
                index: wp.index,
                location: inner.transform.forward(&wp.location)
            })
            .collect();
        inner.send(Request::Navigation(NavigationRequest {
            robot_name: robot_name.to_owned(),
            task_id,
            path: robot_frame_path
        }));
        Some(task_id)
    }

    /// Request the named robot to relocalize itself.
    ///
    /// The location is given in the fleet frame, must be within the relocalization threshold of
    /// the last visited waypoint, and is transformed into the robot frame before it is sent.
    pub fn request_relocalization(
        &self,
        robot_name: &str,
        location: &Location,
        last_visited_waypoint_index: u32
    ) -> Option<TaskId> {
        let mut inner = self.lock_inner();

        if !inner.knows_robot(robot_name) {
            return None
        }

        let wp_index = last_visited_waypoint_index as usize;
        let waypoint = match inner.graph.waypoint(wp_index) {
            Ok(wp) => wp,
            Err(e) => {
                warn!("Rejecting relocalization request for {}: {}", robot_name, e);
                return None
            }
        };

        let dist =
            (Vector2::new(location.x, location.y) - waypoint.position_m).norm();
        if dist > inner.relocalization_threshold_m {
            warn!(
                "Rejecting relocalization request for {}: location is {:.2} m from waypoint {} \
                (limit {:.2} m)",
                robot_name, dist, last_visited_waypoint_index, inner.relocalization_threshold_m
            );
            return None
        }

        let task_id = inner.next_task_id();
        let robot_frame_location = inner.transform.forward(location);
        inner.send(Request::Relocalization(RelocalizationRequest {
            robot_name: robot_name.to_owned(),
            task_id,
            location: robot_frame_location,
            last_visited_waypoint_index
        }));
        Some(task_id)
    }

    /// Run a single manager tick: drain all pending robot states and apply them to the registry.
    pub fn run_once(&self) {
        self.lock_inner().run_once();
    }

    /// Run the manager loop on the calling thread at the given frequency.
    ///
    /// This blocks for the lifetime of the manager.
    pub fn run(&mut self, frequency_hz: u32) -> Result<(), ManagerError> {
        self.check_startable(frequency_hz)?;

        run_loop(self.inner.clone(), self.stop.clone(), frequency_hz);
        Ok(())
    }

    /// Run the manager loop on a worker thread and return immediately.
    ///
    /// The worker is stopped and joined when the manager is dropped.
    pub fn start_async(&mut self, frequency_hz: u32) -> Result<(), ManagerError> {
        self.check_startable(frequency_hz)?;

        let inner = self.inner.clone();
        let stop = self.stop.clone();
        self.worker = Some(thread::spawn(move || run_loop(inner, stop, frequency_hz)));
        Ok(())
    }

    /// Validate the frequency and claim the started flag.
    fn check_startable(&self, frequency_hz: u32) -> Result<(), ManagerError> {
        if frequency_hz == 0 {
            return Err(ManagerError::InvalidFrequency)
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyStarted)
        }
        Ok(())
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<ManagerInner> {
        self.inner.lock().expect("Manager state mutex poisoned")
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

impl ManagerInner {

    /// Whether the robot is in the registry. Logs the rejection if it isn't.
    fn knows_robot(&self, robot_name: &str) -> bool {
        let known = self.robots.contains_key(robot_name);
        if !known {
            warn!(
                "Rejecting request for {}: robot is not registered with fleet {}",
                robot_name, self.fleet_name
            );
        }
        known
    }

    /// Allocate the next task id.
    ///
    /// Ids are strictly increasing and never 0. On the (unreachable in practice) wrap past
    /// `u32::MAX` allocation restarts from 1.
    fn next_task_id(&mut self) -> TaskId {
        self.last_task_id = self.last_task_id.checked_add(1).unwrap_or(1);
        self.last_task_id
    }

    /// Hand a request to the middleware. Failures are logged, the middleware is best-effort.
    fn send(&mut self, request: Request) {
        debug!(
            "Issuing task {} ({:?} request) to {}",
            request.task_id(),
            request,
            request.robot_name()
        );
        if let Err(e) = self.middleware.send_request(&request) {
            warn!(
                "Could not deliver task {} to {}: {}",
                request.task_id(),
                request.robot_name(),
                e
            );
        }
    }

    /// One manager tick.
    fn run_once(&mut self) {
        let states = self.middleware.read_states();

        for state in states {
            let now = (self.time_now)();

            // Robots report in their own frame, the registry works in the fleet frame
            let mut fleet_state = state;
            fleet_state.location = self.transform.inverse(&fleet_state.location);

            let name = fleet_state.name.clone();
            let result = if self.robots.contains_key(&name) {
                let info = self.robots.get_mut(&name).expect("robot key checked above");
                info.update(fleet_state, &self.graph, &self.thresholds, now)
            }
            else {
                match RobotInfo::make(fleet_state, &self.graph, &self.thresholds, now) {
                    Ok(info) => {
                        debug!("Registered new robot {} with fleet {}", name, self.fleet_name);
                        self.robots.insert(name.clone(), info);
                        Ok(())
                    }
                    Err(e) => Err(e)
                }
            };

            match result {
                Ok(()) => {
                    let info = self.robots.get(&name).expect("robot registered above");
                    (self.robot_updated_callback)(info);
                }
                Err(e) => warn!("Dropping state from {}: {}", name, e)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Fixed-period loop driving `run_once` until the stop flag is raised.
fn run_loop(inner: Arc<Mutex<ManagerInner>>, stop: Arc<AtomicBool>, frequency_hz: u32) {
    let period = Duration::from_secs_f64(1.0 / frequency_hz as f64);

    while !stop.load(Ordering::Relaxed) {
        // Get cycle start time
        let cycle_start = Instant::now();

        inner.lock().expect("Manager state mutex poisoned").run_once();

        // Sleep out the remainder of the period. Overruns are not compensated.
        match period.checked_sub(cycle_start.elapsed()) {
            Some(remaining) => thread::sleep(remaining),
            None => warn!(
                "Manager cycle overran by {:.6} s",
                cycle_start.elapsed().as_secs_f64() - period.as_secs_f64()
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::robot_info::TrackingState;
    use fleet_if::msgs::{RobotMode, RobotState};
    use fleet_if::transport::MiddlewareError;

    const LEVEL: &str = "test_level";

    /// Server middleware backed by plain vectors, shared with the test body.
    struct MockServerMiddleware {
        pending_states: Arc<Mutex<Vec<RobotState>>>,
        sent_requests: Arc<Mutex<Vec<Request>>>
    }

    impl ServerMiddleware for MockServerMiddleware {
        fn read_states(&mut self) -> Vec<RobotState> {
            self.pending_states
                .lock()
                .unwrap()
                .drain(..)
                .collect()
        }

        fn send_request(&mut self, request: &Request) -> Result<(), MiddlewareError> {
            self.sent_requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct TestHarness {
        manager: Manager,
        pending_states: Arc<Mutex<Vec<RobotState>>>,
        sent_requests: Arc<Mutex<Vec<Request>>>,
        updated_names: Arc<Mutex<Vec<String>>>
    }

    /// The graph shared by the manager tests: a cross of waypoints around the origin, lanes to
    /// and from the centre, plus one far-away outlier.
    fn test_graph() -> NavGraph {
        let mut graph = NavGraph::new();
        graph.add_waypoint(LEVEL, Vector2::new(0.0, 0.0));
        graph.add_waypoint(LEVEL, Vector2::new(10.0, 0.0));
        graph.add_waypoint(LEVEL, Vector2::new(-10.0, 0.0));
        graph.add_waypoint(LEVEL, Vector2::new(0.0, 10.0));
        graph.add_waypoint(LEVEL, Vector2::new(0.0, -10.0));
        for (entry, exit) in [(0, 1), (1, 0), (0, 2), (2, 0), (0, 3), (3, 0), (0, 4), (4, 0)]
            .iter()
        {
            graph.add_lane(*entry, *exit).unwrap();
        }
        graph.add_waypoint(LEVEL, Vector2::new(100.0, 100.0));
        graph
    }

    fn make_harness(transform: CoordinateTransform) -> TestHarness {
        let pending_states = Arc::new(Mutex::new(Vec::new()));
        let sent_requests = Arc::new(Mutex::new(Vec::new()));
        let updated_names = Arc::new(Mutex::new(Vec::new()));

        let middleware = MockServerMiddleware {
            pending_states: pending_states.clone(),
            sent_requests: sent_requests.clone()
        };

        let updated_names_cb = updated_names.clone();
        let manager = Manager::new(ManagerConfig {
            fleet_name: "test_fleet".into(),
            graph: test_graph(),
            middleware: Box::new(middleware),
            transform,
            thresholds: TrackingThresholds::default(),
            relocalization_threshold_m: DEFAULT_RELOCALIZATION_THRESHOLD_M,
            time_now: Box::new(Instant::now),
            robot_updated_callback: Box::new(move |info: &RobotInfo| {
                updated_names_cb.lock().unwrap().push(info.name.clone());
            })
        })
        .unwrap();

        TestHarness {
            manager,
            pending_states,
            sent_requests,
            updated_names
        }
    }

    fn state_for(name: &str, x: f64, y: f64) -> RobotState {
        RobotState {
            name: name.into(),
            model: "test_model".into(),
            task_id: 0,
            mode: RobotMode::Idle,
            battery_percent: 1.0,
            location: Location::new(LEVEL, x, y, 0.0),
            target_path_waypoint_index: None
        }
    }

    /// Push a state into the mock middleware and tick the manager to register it.
    fn register_robot(harness: &TestHarness, name: &str) {
        harness
            .pending_states
            .lock()
            .unwrap()
            .push(state_for(name, 0.0, 0.0));
        harness.manager.run_once();
    }

    fn waypoint(index: u32, x: f64, y: f64) -> Waypoint {
        Waypoint {
            index,
            location: Location::new(LEVEL, x, y, 0.0)
        }
    }

    #[test]
    fn test_factory_rejects_bad_config() {
        let middleware = MockServerMiddleware {
            pending_states: Arc::new(Mutex::new(Vec::new())),
            sent_requests: Arc::new(Mutex::new(Vec::new()))
        };

        let result = Manager::new(ManagerConfig {
            fleet_name: String::new(),
            graph: test_graph(),
            middleware: Box::new(middleware),
            transform: CoordinateTransform::identity(),
            thresholds: TrackingThresholds::default(),
            relocalization_threshold_m: DEFAULT_RELOCALIZATION_THRESHOLD_M,
            time_now: Box::new(Instant::now),
            robot_updated_callback: Box::new(|_| {})
        });
        assert!(matches!(result, Err(ManagerError::EmptyFleetName)));

        let middleware = MockServerMiddleware {
            pending_states: Arc::new(Mutex::new(Vec::new())),
            sent_requests: Arc::new(Mutex::new(Vec::new()))
        };
        let result = Manager::new(ManagerConfig {
            fleet_name: "test_fleet".into(),
            graph: NavGraph::new(),
            middleware: Box::new(middleware),
            transform: CoordinateTransform::identity(),
            thresholds: TrackingThresholds::default(),
            relocalization_threshold_m: DEFAULT_RELOCALIZATION_THRESHOLD_M,
            time_now: Box::new(Instant::now),
            robot_updated_callback: Box::new(|_| {})
        });
        assert!(matches!(result, Err(ManagerError::EmptyGraph)));
    }

    #[test]
    fn test_empty_registry() {
        let harness = make_harness(CoordinateTransform::identity());

        for _ in 0..5 {
            harness.manager.run_once();
        }

        assert!(harness.manager.robot_names().is_empty());
        assert!(harness.manager.robot("random").is_none());
        assert!(harness.manager.all_robots().is_empty());
    }

    #[test]
    fn test_requests_with_no_robots_rejected() {
        let harness = make_harness(CoordinateTransform::identity());

        assert!(harness.manager.request_pause("test_robot").is_none());
        assert!(harness.manager.request_resume("test_robot").is_none());
        assert!(harness.manager.request_dock("test_robot", "dock").is_none());
        assert!(harness
            .manager
            .request_navigation("test_robot", vec![waypoint(0, 0.0, 0.0)])
            .is_none());
        assert!(harness
            .manager
            .request_relocalization("test_robot", &Location::new(LEVEL, 0.0, 0.0, 0.0), 0)
            .is_none());
        assert!(harness.sent_requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pause_after_registration_gets_first_id() {
        let harness = make_harness(CoordinateTransform::identity());

        assert!(harness.manager.request_pause("test_robot").is_none());

        register_robot(&harness, "test_robot");

        assert_eq!(harness.manager.request_pause("test_robot"), Some(1));
    }

    #[test]
    fn test_registration_and_sorted_names() {
        let harness = make_harness(CoordinateTransform::identity());

        register_robot(&harness, "robot_b");
        register_robot(&harness, "robot_a");
        register_robot(&harness, "robot_c");

        assert_eq!(
            harness.manager.robot_names(),
            vec!["robot_a".to_string(), "robot_b".into(), "robot_c".into()]
        );
        assert_eq!(harness.manager.all_robots().len(), 3);

        let info = harness.manager.robot("robot_a").unwrap();
        assert_eq!(info.name, "robot_a");
        assert_eq!(info.tracking, TrackingState::OnWaypoint(0));
    }

    #[test]
    fn test_task_ids_increase_across_request_types() {
        let harness = make_harness(CoordinateTransform::identity());
        register_robot(&harness, "robot_1");

        assert_eq!(harness.manager.request_dock("robot_1", "dock"), Some(1));
        assert_eq!(harness.manager.request_pause("robot_1"), Some(2));
        assert_eq!(harness.manager.request_resume("robot_1"), Some(3));
        assert_eq!(
            harness
                .manager
                .request_navigation("robot_1", vec![waypoint(0, 0.0, 0.0), waypoint(1, 10.0, 0.0)]),
            Some(4)
        );
        assert_eq!(
            harness
                .manager
                .request_relocalization("robot_1", &Location::new(LEVEL, 0.0, 9.0, 0.0), 3),
            Some(5)
        );

        // Rejections must not consume ids
        assert!(harness.manager.request_dock("robot_1", "").is_none());
        assert_eq!(harness.manager.request_pause("robot_1"), Some(6));

        let sent = harness.sent_requests.lock().unwrap();
        assert_eq!(sent.len(), 6);
        for (i, request) in sent.iter().enumerate() {
            assert_eq!(request.task_id(), (i + 1) as TaskId);
            assert_ne!(request.task_id(), 0);
        }
    }

    #[test]
    fn test_navigation_validation() {
        let harness = make_harness(CoordinateTransform::identity());
        register_robot(&harness, "test_robot");

        // Empty path
        assert!(harness.manager.request_navigation("test_robot", vec![]).is_none());

        // Waypoint index outside the graph
        assert!(harness
            .manager
            .request_navigation("test_robot", vec![waypoint(100, 0.0, 0.0)])
            .is_none());

        assert!(harness.sent_requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_relocalization_validation() {
        let harness = make_harness(CoordinateTransform::identity());
        register_robot(&harness, "test_robot");

        let origin = Location::new(LEVEL, 0.0, 0.0, 0.0);

        // Near waypoint 0
        assert_eq!(
            harness.manager.request_relocalization("test_robot", &origin, 0),
            Some(1)
        );

        // Waypoint index outside the graph
        assert!(harness
            .manager
            .request_relocalization("test_robot", &origin, 100)
            .is_none());

        // Waypoint 5 is at (100, 100), about 141 m from the origin
        assert!(harness
            .manager
            .request_relocalization("test_robot", &origin, 5)
            .is_none());
    }

    #[test]
    fn test_update_callback_invoked() {
        let harness = make_harness(CoordinateTransform::identity());

        register_robot(&harness, "test_robot");
        register_robot(&harness, "test_robot");

        let updated = harness.updated_names.lock().unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|name| name == "test_robot"));
    }

    #[test]
    fn test_invalid_state_dropped() {
        let harness = make_harness(CoordinateTransform::identity());

        let mut bad = state_for("test_robot", 0.0, 0.0);
        bad.battery_percent = 2.0;
        harness.pending_states.lock().unwrap().push(bad);
        harness.manager.run_once();

        assert!(harness.manager.robot_names().is_empty());
        assert!(harness.updated_names.lock().unwrap().is_empty());
    }

    #[test]
    fn test_incoming_states_transformed_to_fleet_frame() {
        // Fleet -> robot: scale 2, no rotation, translation (1, 0). A robot reporting (1, 0) in
        // its own frame sits at the fleet origin.
        let transform = CoordinateTransform::new(&crate::transform::TransformParams {
            scale: 2.0,
            rotation_rad: 0.0,
            translation_x_m: 1.0,
            translation_y_m: 0.0
        })
        .unwrap();
        let harness = make_harness(transform);

        harness
            .pending_states
            .lock()
            .unwrap()
            .push(state_for("test_robot", 1.0, 0.0));
        harness.manager.run_once();

        let info = harness.manager.robot("test_robot").unwrap();
        assert!(info.state.location.x.abs() < 1e-9);
        assert!(info.state.location.y.abs() < 1e-9);
        assert_eq!(info.tracking, TrackingState::OnWaypoint(0));
    }

    #[test]
    fn test_navigation_request_sent_in_robot_frame() {
        let transform = CoordinateTransform::new(&crate::transform::TransformParams {
            scale: 1.0,
            rotation_rad: 0.0,
            translation_x_m: 5.0,
            translation_y_m: 0.0
        })
        .unwrap();
        let harness = make_harness(transform);

        // Robot reporting (5, 0) sits at the fleet origin
        harness
            .pending_states
            .lock()
            .unwrap()
            .push(state_for("test_robot", 5.0, 0.0));
        harness.manager.run_once();

        harness
            .manager
            .request_navigation("test_robot", vec![waypoint(1, 10.0, 0.0)])
            .unwrap();

        let sent = harness.sent_requests.lock().unwrap();
        match &sent[0] {
            Request::Navigation(nav) => {
                assert_eq!(nav.path.len(), 1);
                assert!((nav.path[0].location.x - 15.0).abs() < 1e-9);
            }
            other => panic!("Expected a navigation request, got {:?}", other)
        }
    }

    #[test]
    fn test_run_rejects_zero_frequency() {
        let mut harness = make_harness(CoordinateTransform::identity());

        assert!(matches!(
            harness.manager.run(0),
            Err(ManagerError::InvalidFrequency)
        ));
        assert!(matches!(
            harness.manager.start_async(0),
            Err(ManagerError::InvalidFrequency)
        ));
        assert!(!harness.manager.started());
    }

    #[test]
    fn test_start_async_claims_started() {
        let mut harness = make_harness(CoordinateTransform::identity());

        assert!(!harness.manager.started());
        harness.manager.start_async(50).unwrap();
        assert!(harness.manager.started());

        assert!(matches!(
            harness.manager.start_async(50),
            Err(ManagerError::AlreadyStarted)
        ));

        // The worker registers robots without any help from the test thread
        harness
            .pending_states
            .lock()
            .unwrap()
            .push(state_for("test_robot", 0.0, 0.0));
        let deadline = Instant::now() + Duration::from_secs(2);
        while harness.manager.robot("test_robot").is_none() {
            assert!(Instant::now() < deadline, "Worker never registered the robot");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
