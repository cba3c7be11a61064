pub mod cpu;
pub mod descriptor;
#[allow(clippy::module_inception)]
pub mod host;
pub mod network;
