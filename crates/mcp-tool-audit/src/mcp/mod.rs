//! MCP server discovery: config loading, per-server connection and the
//! concurrent aggregator.
//!
//! Only stdio transports are dialed; remote endpoints are accepted in config
//! and reported as unsupported.

pub mod aggregator;
pub mod connector;
pub mod servers;
pub mod types;

pub use aggregator::{Discovery, DiscoveryOptions, discover};
pub use connector::{ServerConnector, StdioLister, ToolLister};
pub use types::*;
