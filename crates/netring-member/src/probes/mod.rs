pub mod bandwidth;
pub mod http;
pub mod tcp;
pub mod traceroute;

pub use traceroute::{Hop, SystemTracer, TraceResult, Tracer};
