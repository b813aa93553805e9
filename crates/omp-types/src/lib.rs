//! Core types for the OMP region link.
//!
//! This crate defines the data structures shared by the wire protocol, the
//! region host and the server binary. It contains no business logic.

pub mod config;
pub mod error;
pub mod interface;
pub mod region;
