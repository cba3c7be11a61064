mod sim_logger;

pub use sim_logger::{set_buffering_enabled, SimLogger};
