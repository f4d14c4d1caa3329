//! Sourcescan - dependency vulnerability scanning for software projects
//!
//! This crate provides a Domain-Driven Design (DDD) architecture for
//! discovering projects, extracting their build dependencies and resolving
//! them against a vulnerability database.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
