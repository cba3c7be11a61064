pub mod configuration;
pub mod logger;
pub mod main;
pub mod sim;
pub mod sim_config;
pub mod support;
pub mod transfer;
pub mod work;
pub mod worker;
