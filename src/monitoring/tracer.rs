/*!
 * Tracing
 * Structured tracing for fork walks using the tracing crate
 */

use crate::core::config::ForkPolicy;
use crate::core::types::Pid;
use crate::fork::ForkReport;
use std::time::Instant;
use tracing::{debug, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Environment variable enabling JSON output
pub const TRACE_JSON_ENV_VAR: &str = "COW_FORK_TRACE_JSON";

/// Walks slower than this are reported at warn level
const SLOW_FORK_MS: u64 = 50;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - COW_FORK_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV_VAR)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .init();
    }
}

/// Generate a unique trace ID for correlating one fork's events
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one parent-side duplication walk
pub struct ForkSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl ForkSpan {
    pub fn new(parent: Pid, child: Pid, policy: ForkPolicy) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "fork",
            trace_id = %trace_id,
            parent = parent,
            child = child,
            policy = %policy,
            pages = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Record the walk summary and its duration
    pub fn finish(&self, report: &ForkReport) {
        let elapsed = self.start.elapsed();
        let micros = elapsed.as_micros() as u64;
        self.span.record("pages", report.pages as u64);
        self.span.record("duration_us", micros);

        if micros / 1000 > SLOW_FORK_MS {
            warn!(
                trace_id = %self.trace_id,
                pages = report.pages,
                duration_ms = micros / 1000,
                "slow fork"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                pages = report.pages,
                duration_us = micros,
                "fork walk finished"
            );
        }
    }
}
