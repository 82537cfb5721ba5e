//! Stream Intel HEX images into a byte-addressable target over a line-based
//! serial protocol.
//!
//! The host side decodes the file into a [`image::MemoryImage`], splits it into
//! chunks and drives a [`session::TransferSession`]. The device side is a
//! [`responder::ProtocolHandler`] that applies each byte through an
//! [`actuator::Actuator`].

pub mod actuator;
pub mod api;
pub mod chunk;
pub mod hex;
pub mod image;
pub mod line_buffer;
pub mod operation;
pub mod ports;
pub mod protocol;
pub mod responder;
pub mod session;
pub mod transport;
