//! # Zmq Client Middleware
//!
//! The standard transport used by the robot executable. States leave as JSON on a PUB socket,
//! requests arrive on a SUB socket subscribed to this robot's name. A background thread owns the
//! SUB socket and invokes the installed request handlers as messages arrive.
//!
//! Topic subscription is a prefix match in zmq, so a robot named `agv_1` will also receive
//! frames addressed to `agv_10`. The client validates the robot name on every request anyway, so
//! the over-delivery is harmless.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use fleet_if::{
    msgs::{
        DockRequest, NavigationRequest, PauseRequest, RelocalizationRequest, Request,
        ResumeRequest, RobotState,
    },
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    transport::{ClientMiddleware, MiddlewareError, RequestHandler},
};

use crate::params::AgvExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client middleware over a pair of zmq sockets.
pub struct ZmqClientMiddleware {

    /// PUB socket on which the robot state is published
    state_socket: MonitoredSocket,

    /// Handlers invoked by the receive thread, shared with it
    handlers: Arc<Mutex<RequestHandlers>>,

    bg_run: Arc<AtomicBool>,
    bg_jh: Option<JoinHandle<()>>
}

/// The installed request handlers.
#[derive(Default)]
struct RequestHandlers {
    pause: Option<RequestHandler<PauseRequest>>,
    resume: Option<RequestHandler<ResumeRequest>>,
    dock: Option<RequestHandler<DockRequest>>,
    navigation: Option<RequestHandler<NavigationRequest>>,
    relocalization: Option<RequestHandler<RelocalizationRequest>>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while building the [`ZmqClientMiddleware`]
#[derive(thiserror::Error, Debug)]
pub enum ZmqClientMiddlewareError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqClientMiddleware {

    /// Create a new instance of the middleware, connecting both sockets.
    ///
    /// This function will not wait for the manager to be reachable before returning.
    pub fn new(
        ctx: &zmq::Context,
        params: &AgvExecParams
    ) -> Result<Self, ZmqClientMiddlewareError> {
        // Create the socket options
        let state_socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            send_timeout: 10,
            linger: 1,
            ..Default::default()
        };
        let request_socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            recv_timeout: 10,
            linger: 1,
            subscribe: Some(params.robot_name.clone()),
            ..Default::default()
        };

        // Create the sockets
        let state_socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            state_socket_options,
            &params.state_endpoint
        )?;
        let request_socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            request_socket_options,
            &params.request_endpoint
        )?;

        // Shared objects for the receive thread
        let handlers = Arc::new(Mutex::new(RequestHandlers::default()));
        let bg_run = Arc::new(AtomicBool::new(true));

        let handlers_clone = handlers.clone();
        let bg_run_clone = bg_run.clone();

        // Start the receive thread
        let bg_jh = Some(thread::spawn(move || {
            bg_thread(request_socket, bg_run_clone, handlers_clone)
        }));

        // Create self
        Ok(Self {
            state_socket,
            handlers,
            bg_run,
            bg_jh
        })
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<RequestHandlers> {
        self.handlers.lock().expect("Request handlers mutex poisoned")
    }
}

impl ClientMiddleware for ZmqClientMiddleware {

    fn send_state(&self, state: &RobotState) -> Result<(), MiddlewareError> {
        // Check the manager is reachable
        if !self.state_socket.connected() {
            return Err(MiddlewareError::NotConnected)
        }

        // Serialise the state
        let state_str = serde_json::to_string(state)
            .map_err(MiddlewareError::SerializationError)?;

        // Send the state
        self.state_socket
            .send(state_str.as_bytes(), 0)
            .map_err(|e| MiddlewareError::SendError(e.to_string()))
    }

    fn set_pause_request_callback(&mut self, callback: RequestHandler<PauseRequest>) {
        self.lock_handlers().pause = Some(callback);
    }

    fn set_resume_request_callback(&mut self, callback: RequestHandler<ResumeRequest>) {
        self.lock_handlers().resume = Some(callback);
    }

    fn set_dock_request_callback(&mut self, callback: RequestHandler<DockRequest>) {
        self.lock_handlers().dock = Some(callback);
    }

    fn set_navigation_request_callback(&mut self, callback: RequestHandler<NavigationRequest>) {
        self.lock_handlers().navigation = Some(callback);
    }

    fn set_relocalization_request_callback(
        &mut self,
        callback: RequestHandler<RelocalizationRequest>
    ) {
        self.lock_handlers().relocalization = Some(callback);
    }
}

impl Drop for ZmqClientMiddleware {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            // The receive thread polls its run flag on every receive timeout, so this join is
            // bounded.
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Receive thread, decodes incoming requests and dispatches them to the installed handlers.
fn bg_thread(
    socket: MonitoredSocket,
    run: Arc<AtomicBool>,
    handlers: Arc<Mutex<RequestHandlers>>
) {

    // While instructed to run
    while run.load(Ordering::Relaxed) {
        // Read the next multipart message from the socket
        let frames = match socket.recv_multipart(0) {
            Ok(f) => f,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving request message: {:?}", e);
                break
            }
        };

        // Requests are [robot_name, json] pairs
        if frames.len() != 2 {
            warn!("Received a request message with {} frames, expected 2", frames.len());
            continue
        }

        let payload = match std::str::from_utf8(&frames[1]) {
            Ok(s) => s,
            Err(_) => {
                warn!("Received a request which was not valid UTF-8");
                continue
            }
        };

        // Deserialize the request
        let request: Request = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("Could not deserialize a request: {}", e);
                continue
            }
        };

        // Dispatch to the matching handler, if one is installed
        let handlers = handlers.lock().expect("Request handlers mutex poisoned");
        match request {
            Request::Pause(r) => {
                if let Some(cb) = handlers.pause.as_ref() {
                    cb(r)
                }
            }
            Request::Resume(r) => {
                if let Some(cb) = handlers.resume.as_ref() {
                    cb(r)
                }
            }
            Request::Dock(r) => {
                if let Some(cb) = handlers.dock.as_ref() {
                    cb(r)
                }
            }
            Request::Navigation(r) => {
                if let Some(cb) = handlers.navigation.as_ref() {
                    cb(r)
                }
            }
            Request::Relocalization(r) => {
                if let Some(cb) = handlers.relocalization.as_ref() {
                    cb(r)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimParams;
    use fleet_if::msgs::{Location, RobotMode};

    fn test_params() -> AgvExecParams {
        AgvExecParams {
            robot_name: "test_robot".into(),
            robot_model: "test_model".into(),
            // Nothing binds these endpoints, the middleware stays unconnected
            state_endpoint: "tcp://127.0.0.1:57643".into(),
            request_endpoint: "tcp://127.0.0.1:57644".into(),
            cycle_frequency_hz: 10,
            sim: SimParams {
                start_level_name: "test_level".into(),
                start_x_m: 0.0,
                start_y_m: 0.0,
                start_yaw_rad: 0.0,
                speed_ms: 1.0,
                dock_duration_s: 1.0,
                battery_start: 1.0,
                battery_drain_per_s: 0.0,
                step_frequency_hz: 10
            }
        }
    }

    #[test]
    fn test_send_state_refused_without_manager() {
        let ctx = zmq::Context::new();
        let middleware = ZmqClientMiddleware::new(&ctx, &test_params()).unwrap();

        let state = RobotState {
            name: "test_robot".into(),
            model: "test_model".into(),
            task_id: 0,
            mode: RobotMode::Idle,
            battery_percent: 1.0,
            location: Location::new("test_level", 0.0, 0.0, 0.0),
            target_path_waypoint_index: None
        };

        assert!(matches!(
            middleware.send_state(&state),
            Err(MiddlewareError::NotConnected)
        ));
    }
}
