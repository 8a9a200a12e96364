//! Host platform (linux for example) utility functions

use std::path::PathBuf;

/// Get the root directory of the fleet software from the environment.
///
/// All session output is written below this directory.
pub fn get_fleet_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var("FLEET_SW_ROOT").map(PathBuf::from)
}
