//! # Fleet interface crate.
//!
//! Provides all common interfaces between the fleet manager and the robot
//! clients: the wire message types, the middleware traits which abstract the
//! transport, and the zmq-backed networking layer used by the standard
//! middleware implementations.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Wire message definitions (robot state and requests)
pub mod msgs;

/// Middleware traits abstracting the transport between manager and clients
pub mod transport;

/// Network module
pub mod net;
