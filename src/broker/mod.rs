pub mod server;
pub mod socket;

pub use server::{create_router, AppState, Broker, RunningBroker};
