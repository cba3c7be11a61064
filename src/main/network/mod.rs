//! The network simulation.
//!
//! This contains the packets that hosts exchange. Routing between hosts is done by the
//! [`Simulation`](crate::core::sim::Simulation), and the emulation of host networking exists in the
//! [`crate::host`] module.

pub mod packet;
