//! Emulation of a host's networking: its interfaces, the association of sockets with addresses,
//! and the delivery of arriving packets.

pub mod dispatch;
pub mod interface;
pub mod namespace;
