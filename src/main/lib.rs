/*
 * The Shadow Simulator
 * See LICENSE for licensing information
 */

//! The per-host core of a discrete-event network simulator: simulated time, a virtual CPU timing
//! model, hosts with TCP sockets and network interfaces, and the events that carry packets between
//! hosts.

#![forbid(unsafe_code)]

// modules with macros must be included before other modules
#[macro_use]
pub mod utility;

pub mod core;
pub mod host;
pub mod network;
