//! Request handlers

mod health;
mod workspaces;

pub use health::*;
pub use workspaces::*;
