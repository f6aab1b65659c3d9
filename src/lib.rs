pub mod backend;
pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod router;
