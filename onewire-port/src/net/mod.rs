//! 1-Wire adapters shared over TCP.
//!
//! A [`NetAdapterHost`] owns a local adapter and serves it; a [`NetAdapter`] on another
//! machine is a [`PortAdapter`](crate::PortAdapter) whose every operation is a request to
//! the host.

mod client;
mod host;
pub mod wire;

pub use client::NetAdapter;
pub use host::{NetAdapterHost, StopHandle};
