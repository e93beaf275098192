//! Utility types and functions.
//!
//! This module contains fundamental types used throughout the library:
//! - [`DataType`] - Closed registry of value and object kinds
//! - [`ValueType`] - Rust types bound to a [`DataType`]
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam plus boxes and interpolation

mod data_type;
mod error;
mod math;

pub use data_type::*;
pub use error::*;
pub use math::*;
