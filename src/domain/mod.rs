//! Domain layer - Core types and port definitions
//!
//! This module defines the cluster entities and the traits (ports) that the
//! REST client and the simulated cluster implement, following hexagonal
//! architecture principles.

pub mod ports;

pub use ports::*;
