/*!
 * Monitoring
 * Structured tracing for fork and fault handling
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, ForkSpan, TRACE_JSON_ENV_VAR};
