pub mod cli;
pub mod config;
pub mod controller;
pub mod daqmx;
pub mod driver;
pub mod sim;
pub mod task;
pub mod utils;
pub mod writer;

pub use cli::*;
pub use config::*;
pub use controller::*;
pub use daqmx::*;
pub use driver::*;
pub use sim::*;
pub use task::*;
pub use utils::*;
pub use writer::*;
