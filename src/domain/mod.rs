//! Domain Layer - Core business logic and entities
//!
//! This module contains the core domain entities, value objects, and domain services
//! that represent the business logic of vulnerability analysis.

pub mod entities;
pub mod errors;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use services::*;
pub use value_objects::*;
