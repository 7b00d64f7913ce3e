pub mod client;
pub mod middleware;

pub use client::TracedClient;
pub use middleware::{TraceLayer, TraceService};
