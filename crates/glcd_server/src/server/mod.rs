//! Hub server lifecycle.
//!
//! This module contains the hub structure that wires every component together
//! and runs the ingress loop.

pub mod core;

pub use core::HubServer;
