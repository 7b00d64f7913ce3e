pub mod config;
pub mod context;
pub mod error;
pub mod header;
pub mod ids;
pub mod model;
pub mod time;

pub use context::{
    SegmentGuard, SegmentSink, SubsegmentGuard, TraceContext, Tracer, capture, capture_sync,
};
pub use error::{Result, TracelineError};
