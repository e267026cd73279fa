//! Data models for dormwatch

mod alert;
mod balance;

pub use alert::*;
pub use balance::*;
