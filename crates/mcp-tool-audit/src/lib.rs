//! Audit MCP tool servers: list every configured server's tools concurrently
//! and flag descriptions that could manipulate an agent.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod report;
pub mod run;
