//! CLI command implementations.

pub mod init;
pub mod remote;
pub mod serve;
