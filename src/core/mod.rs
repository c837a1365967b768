//! Core types shared by every router component.

pub mod error;

pub use error::{RouterError, RouterResult};
