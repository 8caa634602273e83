//! Core types for parley.

pub mod command;
pub mod event;
pub mod message;
pub mod usage;

pub use command::*;
pub use event::*;
pub use message::*;
pub use usage::*;
