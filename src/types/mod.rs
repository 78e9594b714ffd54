//! Core types for toolbridge.

pub mod message;
pub mod outcome;
pub mod tool;
pub mod usage;

pub use message::*;
pub use outcome::*;
pub use tool::*;
pub use usage::*;
