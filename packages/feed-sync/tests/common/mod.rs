// Common test utilities

pub mod harness;
pub mod route_server;

pub use harness::*;
pub use route_server::*;
