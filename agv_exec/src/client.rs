//! # Robot Client
//!
//! The client sits between the fleet manager and a single robot. Its loop publishes the robot's
//! state upstream once per tick, while request handlers installed on the middleware execute
//! inbound commands against the robot's driver.
//!
//! Handlers run on the middleware's receive context, so the client's task state (the current task
//! id and the set of task ids it has ever accepted) lives behind a mutex shared between the
//! handlers, the publish tick and the completion callbacks handed to the driver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Internal
use crate::handles::{CommandHandle, RequestCompleted, StatusHandle};
use fleet_if::msgs::{RobotState, TaskId};
use fleet_if::transport::ClientMiddleware;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything needed to build a [`Client`].
pub struct ClientConfig {
    /// Name of the robot, must not be empty
    pub robot_name: String,

    /// Model of the robot, must not be empty
    pub robot_model: String,

    /// Driver commands are executed against this handle
    pub command_handle: Box<dyn CommandHandle>,

    /// The published state is assembled from this handle
    pub status_handle: Box<dyn StatusHandle>,

    /// Transport used to reach the manager
    pub middleware: Box<dyn ClientMiddleware>
}

/// The robot client's public handle.
pub struct Client {
    /// The publish half: status handle and middleware, used by the tick
    publisher: Arc<Mutex<ClientPublisher>>,

    /// Task state shared with the request handlers and completion callbacks
    task_state: Arc<Mutex<TaskState>>,

    started: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>
}

/// State assembled into the published message on every tick.
struct ClientPublisher {
    robot_name: String,
    robot_model: String,
    status: Box<dyn StatusHandle>,
    middleware: Box<dyn ClientMiddleware>,
    task_state: Arc<Mutex<TaskState>>
}

/// The client's record of the tasks it has been given.
struct TaskState {
    /// Name of this robot, requests for other names are rejected
    robot_name: String,

    /// Id of the task currently considered active, if any
    current_task_id: Option<TaskId>,

    /// Every task id ever accepted, for duplicate rejection
    seen_task_ids: HashSet<TaskId>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by the client factory and loop entry points.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("The robot name must not be empty")]
    EmptyRobotName,

    #[error("The robot model must not be empty")]
    EmptyRobotModel,

    #[error("The loop frequency must be greater than 0")]
    InvalidFrequency,

    #[error("The client has already been started")]
    AlreadyStarted
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Client {

    /// Build a new client from the given configuration.
    ///
    /// This installs the five request handlers on the middleware, so requests may start
    /// executing as soon as this function returns, whether or not the loop has started.
    pub fn new(mut config: ClientConfig) -> Result<Self, ClientError> {
        if config.robot_name.is_empty() {
            return Err(ClientError::EmptyRobotName)
        }
        if config.robot_model.is_empty() {
            return Err(ClientError::EmptyRobotModel)
        }

        let task_state = Arc::new(Mutex::new(TaskState {
            robot_name: config.robot_name.clone(),
            current_task_id: None,
            seen_task_ids: HashSet::new()
        }));
        let command = Arc::new(Mutex::new(config.command_handle));

        install_handlers(&mut *config.middleware, &task_state, &command);

        Ok(Self {
            publisher: Arc::new(Mutex::new(ClientPublisher {
                robot_name: config.robot_name,
                robot_model: config.robot_model,
                status: config.status_handle,
                middleware: config.middleware,
                task_state: task_state.clone()
            })),
            task_state,
            started: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None
        })
    }

    /// Id of the task the client currently considers active, if any.
    pub fn current_task_id(&self) -> Option<TaskId> {
        self.lock_task_state().current_task_id
    }

    /// Whether the client loop has been started.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Run a single client tick: assemble the robot's state and publish it.
    pub fn run_once(&self) {
        self.publisher
            .lock()
            .expect("Client publisher mutex poisoned")
            .run_once();
    }

    /// Run the client loop on the calling thread at the given frequency.
    ///
    /// This blocks for the lifetime of the client.
    pub fn run(&mut self, frequency_hz: u32) -> Result<(), ClientError> {
        self.check_startable(frequency_hz)?;

        run_loop(self.publisher.clone(), self.stop.clone(), frequency_hz);
        Ok(())
    }

    /// Run the client loop on a worker thread and return immediately.
    ///
    /// The worker is stopped and joined when the client is dropped.
    pub fn start_async(&mut self, frequency_hz: u32) -> Result<(), ClientError> {
        self.check_startable(frequency_hz)?;

        let publisher = self.publisher.clone();
        let stop = self.stop.clone();
        self.worker = Some(thread::spawn(move || run_loop(publisher, stop, frequency_hz)));
        Ok(())
    }

    /// Validate the frequency and claim the started flag.
    fn check_startable(&self, frequency_hz: u32) -> Result<(), ClientError> {
        if frequency_hz == 0 {
            return Err(ClientError::InvalidFrequency)
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted)
        }
        Ok(())
    }

    fn lock_task_state(&self) -> std::sync::MutexGuard<TaskState> {
        self.task_state.lock().expect("Client task state mutex poisoned")
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

impl ClientPublisher {

    /// One client tick.
    fn run_once(&mut self) {
        let task_id = self
            .task_state
            .lock()
            .expect("Client task state mutex poisoned")
            .current_task_id
            .unwrap_or(0);

        // A negative target index from the status handle means "no target"
        let target = self.status.target_path_waypoint_index();

        let state = RobotState {
            name: self.robot_name.clone(),
            model: self.robot_model.clone(),
            task_id,
            mode: self.status.mode(),
            battery_percent: self.status.battery_percent(),
            location: self.status.location(),
            target_path_waypoint_index: if target < 0 { None } else { Some(target as u32) }
        };

        if let Err(e) = self.middleware.send_state(&state) {
            warn!("Could not publish the robot state: {}", e);
        }
    }
}

impl TaskState {

    /// Apply the request validity rules, recording the task id if the request is accepted.
    ///
    /// A request is accepted iff it is addressed to this robot, its task id has not been seen
    /// before, and its task id is not the reserved value 0. On acceptance the id becomes the
    /// current task id.
    fn admit(&mut self, request_robot_name: &str, task_id: TaskId) -> bool {
        if request_robot_name != self.robot_name {
            debug!(
                "Ignoring a request for robot {}, this is robot {}",
                request_robot_name, self.robot_name
            );
            return false
        }
        if task_id == 0 {
            debug!("Ignoring a request with the reserved task id 0");
            return false
        }
        if !self.seen_task_ids.insert(task_id) {
            debug!("Ignoring a duplicate delivery of task {}", task_id);
            return false
        }

        self.current_task_id = Some(task_id);
        true
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Install the five request handlers on the middleware.
///
/// Each handler admits the request against the shared task state and, if accepted, drives the
/// command handle. The task state lock is released before the driver is called, so a driver
/// which completes synchronously cannot deadlock.
fn install_handlers(
    middleware: &mut dyn ClientMiddleware,
    task_state: &Arc<Mutex<TaskState>>,
    command: &Arc<Mutex<Box<dyn CommandHandle>>>
) {
    let state = task_state.clone();
    let cmd = command.clone();
    middleware.set_pause_request_callback(Box::new(move |request| {
        if !admit(&state, &request.robot_name, request.task_id) {
            return
        }
        lock_command(&cmd).stop();
    }));

    let state = task_state.clone();
    let cmd = command.clone();
    middleware.set_resume_request_callback(Box::new(move |request| {
        if !admit(&state, &request.robot_name, request.task_id) {
            return
        }
        lock_command(&cmd).resume();
    }));

    let state = task_state.clone();
    let cmd = command.clone();
    middleware.set_dock_request_callback(Box::new(move |request| {
        if !admit(&state, &request.robot_name, request.task_id) {
            return
        }
        let on_complete = completion(Arc::downgrade(&state), request.task_id);
        lock_command(&cmd).dock(&request.dock_name, on_complete);
    }));

    let state = task_state.clone();
    let cmd = command.clone();
    middleware.set_navigation_request_callback(Box::new(move |request| {
        if !admit(&state, &request.robot_name, request.task_id) {
            return
        }
        let on_complete = completion(Arc::downgrade(&state), request.task_id);
        lock_command(&cmd).follow_new_path(&request.path, on_complete);
    }));

    let state = task_state.clone();
    let cmd = command.clone();
    middleware.set_relocalization_request_callback(Box::new(move |request| {
        if !admit(&state, &request.robot_name, request.task_id) {
            return
        }
        let on_complete = completion(Arc::downgrade(&state), request.task_id);
        lock_command(&cmd).relocalize(&request.location, on_complete);
    }));
}

fn admit(state: &Arc<Mutex<TaskState>>, request_robot_name: &str, task_id: TaskId) -> bool {
    state
        .lock()
        .expect("Client task state mutex poisoned")
        .admit(request_robot_name, task_id)
}

fn lock_command(
    command: &Arc<Mutex<Box<dyn CommandHandle>>>
) -> std::sync::MutexGuard<Box<dyn CommandHandle>> {
    command.lock().expect("Client command handle mutex poisoned")
}

/// Build the completion callback handed to the driver for the given task.
///
/// The callback clears the current task id only if it still equals the completing id, so a
/// completion arriving after the task has been supplanted has no effect. Holding only a weak
/// reference also makes it a no-op after the client is torn down.
fn completion(task_state: Weak<Mutex<TaskState>>, task_id: TaskId) -> RequestCompleted {
    Box::new(move || {
        if let Some(state) = task_state.upgrade() {
            let mut state = state.lock().expect("Client task state mutex poisoned");
            if state.current_task_id == Some(task_id) {
                state.current_task_id = None;
            }
        }
    })
}

/// Fixed-period loop driving the publish tick until the stop flag is raised.
fn run_loop(publisher: Arc<Mutex<ClientPublisher>>, stop: Arc<AtomicBool>, frequency_hz: u32) {
    let period = Duration::from_secs_f64(1.0 / frequency_hz as f64);

    while !stop.load(Ordering::Relaxed) {
        // Get cycle start time
        let cycle_start = Instant::now();

        publisher
            .lock()
            .expect("Client publisher mutex poisoned")
            .run_once();

        // Sleep out the remainder of the period. Overruns are not compensated.
        match period.checked_sub(cycle_start.elapsed()) {
            Some(remaining) => thread::sleep(remaining),
            None => warn!(
                "Client cycle overran by {:.6} s",
                cycle_start.elapsed().as_secs_f64() - period.as_secs_f64()
            )
        }
    }
}
