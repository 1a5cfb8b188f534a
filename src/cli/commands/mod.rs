//! CLI command implementations.

mod config;
mod doctor;
mod list;
mod process;
mod schedule;

pub use config::run_config;
pub use doctor::run_doctor;
pub use list::run_list;
pub use process::run_process;
pub use schedule::run_schedule;
