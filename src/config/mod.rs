//! Configuration persistence collaborator and tunnel spec parsing.

pub mod spec;
pub mod store;

pub use spec::{format_tunnel_spec, parse_tunnel_spec};
pub use store::{Config, ConfigStore, JsonFileConfigStore, MemoryConfigStore, MonthlyTraffic};
