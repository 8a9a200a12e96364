//! Fleet manager executable entry point.
//!
//! # Architecture
//!
//! The executable wires the manager library up to the real world:
//!
//!     - Create the session and logging
//!     - Load parameters and the navigation graph
//!     - Bind the zmq server middleware
//!     - Build the manager and run its loop on this thread
//!
//! Robot updates surface through the manager's update callback and are logged. Supervisory
//! control (issuing requests) is exposed through the `mgr_lib` library rather than this
//! executable, which only monitors the fleet.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::eyre, eyre::WrapErr, Report};
use log::{debug, info};
use std::env;
use std::time::Instant;

// Internal
use mgr_lib::{
    graph::{GraphSpec, NavGraph},
    manager::{Manager, ManagerConfig},
    middleware::ZmqServerMiddleware,
    params::MgrExecParams,
    robot_info::RobotInfo,
    transform::CoordinateTransform,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Parameter file used when none is given on the command line.
const DEFAULT_PARAMS_PATH: &str = "params/mgr_exec.toml";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "mgr_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Fleet Manager Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    // Collect all arguments, a single argument overrides the parameter file path
    let args: Vec<String> = env::args().collect();
    let params_path = match args.len() {
        1 => DEFAULT_PARAMS_PATH,
        2 => &args[1],
        _ => return Err(eyre!(
            "Expected either zero or one argument, found {}", args.len() - 1))
    };

    let params: MgrExecParams = util::params::load(params_path)
        .wrap_err("Could not load manager params")?;

    info!("Manager parameters loaded from {:?}", params_path);
    info!("    Fleet name: {}", params.fleet_name);

    // ---- LOAD NAVIGATION GRAPH ----

    let graph_spec: GraphSpec = util::params::load(&params.graph_file)
        .wrap_err("Could not load the navigation graph file")?;
    let graph = NavGraph::from_spec(&graph_spec)
        .wrap_err("Could not build the navigation graph")?;

    info!(
        "Navigation graph loaded: {} waypoints, {} lanes",
        graph.num_waypoints(),
        graph.num_lanes()
    );

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = fleet_if::net::zmq::Context::new();

    let middleware = ZmqServerMiddleware::new(&zmq_ctx, &params)
        .wrap_err("Failed to initialise the server middleware")?;

    info!("Network initialisation complete");

    // ---- BUILD AND RUN THE MANAGER ----

    let transform = CoordinateTransform::new(&params.transform)
        .wrap_err("Invalid coordinate transform parameters")?;

    let cycle_frequency_hz = params.cycle_frequency_hz;

    let mut manager = Manager::new(ManagerConfig {
        fleet_name: params.fleet_name,
        graph,
        middleware: Box::new(middleware),
        transform,
        thresholds: params.tracking,
        relocalization_threshold_m: params.relocalization_threshold_m,
        time_now: Box::new(Instant::now),
        robot_updated_callback: Box::new(robot_updated)
    })
    .wrap_err("Failed to build the manager")?;

    info!("Begining main loop at {} Hz\n", cycle_frequency_hz);

    manager.run(cycle_frequency_hz)
        .wrap_err("The manager loop could not be started")?;

    // ---- SHUTDOWN ----

    info!("End of execution");

    Ok(())
}

/// Log every robot update reported by the manager.
fn robot_updated(info: &RobotInfo) {
    debug!(
        "{}: mode {:?}, battery {:.0}%, tracking {:?}, task {}",
        info.name,
        info.mode,
        info.state.battery_percent * 100.0,
        info.tracking,
        info.state.task_id
    );
}
