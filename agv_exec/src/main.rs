//! Robot-side executable entry point.
//!
//! # Architecture
//!
//! The executable wires the client library up to a simulated robot:
//!
//!     - Create the session and logging
//!     - Load parameters
//!     - Start the simulated robot
//!     - Connect the zmq client middleware
//!     - Build the client and run its loop on this thread
//!
//! Running several of these (each with its own parameter file naming a unique robot) against one
//! manager gives a whole simulated fleet.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::eyre, eyre::WrapErr, Report};
use log::info;
use std::env;

// Internal
use agv_lib::{
    client::{Client, ClientConfig},
    middleware::ZmqClientMiddleware,
    params::AgvExecParams,
    sim::SimRobot,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Parameter file used when none is given on the command line.
const DEFAULT_PARAMS_PATH: &str = "params/agv_exec.toml";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "agv_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Robot Client Executable\n");
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

    let params: AgvExecParams = util::params::load(params_path)
        .wrap_err("Could not load robot params")?;

    info!("Robot parameters loaded from {:?}", params_path);
    info!("    Robot name: {}", params.robot_name);
    info!("    Robot model: {}", params.robot_model);

    // ---- START THE SIMULATED ROBOT ----

    let sim_robot = SimRobot::new(&params.sim);
    let (commands, status) = sim_robot.handles(&params.sim);

    info!("Simulated robot started");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = fleet_if::net::zmq::Context::new();

    let middleware = ZmqClientMiddleware::new(&zmq_ctx, &params)
        .wrap_err("Failed to initialise the client middleware")?;

    info!("Network initialisation complete");

    // ---- BUILD AND RUN THE CLIENT ----

    let cycle_frequency_hz = params.cycle_frequency_hz;

    let mut client = Client::new(ClientConfig {
        robot_name: params.robot_name,
        robot_model: params.robot_model,
        command_handle: Box::new(commands),
        status_handle: Box::new(status),
        middleware: Box::new(middleware)
    })
    .wrap_err("Failed to build the client")?;

    info!("Begining main loop at {} Hz\n", cycle_frequency_hz);

    client.run(cycle_frequency_hz)
        .wrap_err("The client loop could not be started")?;

    // ---- SHUTDOWN ----

    info!("End of execution");

    Ok(())
}
