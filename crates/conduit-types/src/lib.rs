//! Shared transcript, tool and error types for Conduit.

pub mod error;
pub mod message;
pub mod provider;
pub mod registry;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConduitError, ConfigError, ToolError};
pub use message::*;
pub use registry::ToolRegistry;
pub use tool::*;
pub use util::truncate_str;
