//! Core (`/api/v1`) kinds.

pub mod config_map;
pub mod endpoints;

pub use config_map::*;
pub use endpoints::*;
