//! Custom Resource Definitions for the Coastie operator

mod coastie;
pub mod types;


pub use coastie::{Coastie, CoastieSpec, CoastieStatus, SpecValidationError};
pub use types::*;
