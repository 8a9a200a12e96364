//! # Transport Middleware Traits
//!
//! The manager and the clients never talk to a socket directly, they talk to
//! a middleware implementing one of the traits below. The zmq middlewares
//! shipped with the manager and robot executables are the standard
//! implementations, test code substitutes mocks.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

use crate::msgs::{
    DockRequest, NavigationRequest, PauseRequest, RelocalizationRequest, Request, ResumeRequest,
    RobotState,
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Handler invoked by a client middleware when a request arrives.
///
/// Handlers are invoked on the middleware's own receive context, which may be
/// a different thread than the one running the client's tick.
pub type RequestHandler<R> = Box<dyn Fn(R) + Send + Sync + 'static>;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur inside a middleware implementation.
///
/// Middlewares are treated as best-effort by the manager and the clients,
/// these errors are logged and never propagated further.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("Not connected to the remote endpoint")]
    NotConnected,

    #[error("Could not send the message: {0}")]
    SendError(String),

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error)
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Middleware used by a robot client.
///
/// Each `set_*_request_callback` replaces the single handler for that request
/// type. The client installs all five handlers before its loop starts.
pub trait ClientMiddleware: Send {
    /// Publish the robot's state upstream to the manager.
    fn send_state(&self, state: &RobotState) -> Result<(), MiddlewareError>;

    /// Set the handler invoked when a pause request arrives.
    fn set_pause_request_callback(&mut self, callback: RequestHandler<PauseRequest>);

    /// Set the handler invoked when a resume request arrives.
    fn set_resume_request_callback(&mut self, callback: RequestHandler<ResumeRequest>);

    /// Set the handler invoked when a dock request arrives.
    fn set_dock_request_callback(&mut self, callback: RequestHandler<DockRequest>);

    /// Set the handler invoked when a navigation request arrives.
    fn set_navigation_request_callback(&mut self, callback: RequestHandler<NavigationRequest>);

    /// Set the handler invoked when a relocalization request arrives.
    fn set_relocalization_request_callback(
        &mut self,
        callback: RequestHandler<RelocalizationRequest>
    );
}

/// Middleware used by the fleet manager.
pub trait ServerMiddleware: Send {
    /// Return all robot states received since the last call, without
    /// blocking.
    ///
    /// States from the same robot must be returned in the order they arrived.
    /// States from different robots may be interleaved in any order.
    fn read_states(&mut self) -> Vec<RobotState>;

    /// Deliver a request to the robot it is addressed to.
    fn send_request(&mut self, request: &Request) -> Result<(), MiddlewareError>;
}
