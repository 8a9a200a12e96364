//! # Zmq Server Middleware
//!
//! The standard transport used by the manager executable. Robot states arrive as JSON on a bound
//! SUB socket, requests leave as `[robot_name, json]` multipart messages on a bound PUB socket so
//! that each client only receives the requests addressed to it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use fleet_if::{
    msgs::{Request, RobotState},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    transport::{MiddlewareError, ServerMiddleware},
};
use log::warn;

use crate::params::MgrExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Server middleware over a pair of zmq sockets.
pub struct ZmqServerMiddleware {

    /// SUB socket on which robot states arrive
    state_socket: MonitoredSocket,

    /// PUB socket on which requests are published, topic'd by robot name
    request_socket: MonitoredSocket
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while building the [`ZmqServerMiddleware`]
#[derive(thiserror::Error, Debug)]
pub enum ZmqServerMiddlewareError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqServerMiddleware {

    /// Create a new instance of the middleware, binding both sockets.
    ///
    /// This function will not wait for any client to connect before returning.
    pub fn new(
        ctx: &zmq::Context,
        params: &MgrExecParams
    ) -> Result<Self, ZmqServerMiddlewareError> {
        // Create the socket options
        let state_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            subscribe: Some(String::new()),
            recv_timeout: 10,
            ..Default::default()
        };
        let request_socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            send_timeout: 10,
            ..Default::default()
        };

        // Create the sockets
        let state_socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            state_socket_options,
            &params.state_endpoint
        )?;
        let request_socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            request_socket_options,
            &params.request_endpoint
        )?;

        // Create self
        Ok(Self {
            state_socket,
            request_socket
        })
    }
}

impl ServerMiddleware for ZmqServerMiddleware {

    fn read_states(&mut self) -> Vec<RobotState> {
        let mut states = Vec::new();

        // Drain the socket without blocking. Zmq preserves per-publisher ordering, which gives
        // the per-robot FIFO the manager relies on.
        loop {
            match self.state_socket.recv_string(zmq::DONTWAIT) {
                Ok(Ok(msg)) => match serde_json::from_str(&msg) {
                    Ok(state) => states.push(state),
                    Err(e) => warn!("Could not deserialize a robot state: {}", e)
                },
                Ok(Err(_)) => warn!("Received a robot state which was not valid UTF-8"),
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    warn!("Could not read from the state socket: {}", e);
                    break
                }
            }
        }

        states
    }

    fn send_request(&mut self, request: &Request) -> Result<(), MiddlewareError> {
        // Check a client has attached, otherwise the request would vanish into the void
        if !self.request_socket.connected() {
            return Err(MiddlewareError::NotConnected)
        }

        // Serialise the request
        let request_str = serde_json::to_string(request)
            .map_err(MiddlewareError::SerializationError)?;

        // First frame is the robot name so clients can subscribe to just their own requests
        self.request_socket
            .send(request.robot_name().as_bytes(), zmq::SNDMORE)
            .map_err(|e| MiddlewareError::SendError(e.to_string()))?;
        self.request_socket
            .send(request_str.as_bytes(), 0)
            .map_err(|e| MiddlewareError::SendError(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manager::DEFAULT_RELOCALIZATION_THRESHOLD_M;
    use crate::robot_info::TrackingThresholds;
    use crate::transform::TransformParams;
    use fleet_if::msgs::{PauseRequest, Request};

    fn test_params() -> MgrExecParams {
        MgrExecParams {
            fleet_name: "test_fleet".into(),
            state_endpoint: "tcp://127.0.0.1:57641".into(),
            request_endpoint: "tcp://127.0.0.1:57642".into(),
            cycle_frequency_hz: 10,
            graph_file: "unused.toml".into(),
            transform: TransformParams {
                scale: 1.0,
                rotation_rad: 0.0,
                translation_x_m: 0.0,
                translation_y_m: 0.0
            },
            tracking: TrackingThresholds::default(),
            relocalization_threshold_m: DEFAULT_RELOCALIZATION_THRESHOLD_M
        }
    }

    #[test]
    fn test_no_clients_attached() {
        let ctx = zmq::Context::new();
        let mut middleware = ZmqServerMiddleware::new(&ctx, &test_params()).unwrap();

        // Nothing has published a state
        assert!(middleware.read_states().is_empty());

        // Nothing has attached to the request socket, so sends are refused rather than dropped
        // silently by zmq
        let request = Request::Pause(PauseRequest {
            robot_name: "test_robot".into(),
            task_id: 1
        });
        assert!(matches!(
            middleware.send_request(&request),
            Err(MiddlewareError::NotConnected)
        ));
    }
}
