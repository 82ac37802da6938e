//! # MongoDB Operator CLI Library
//!
//! Command definitions for running the operator and inspecting scaling
//! plans offline

pub mod commands;

pub use commands::*;
