pub mod emitter;
pub mod proxy;
pub mod wire;

pub use emitter::{Emitter, EmitterConfig};
pub use proxy::DaemonProxy;
