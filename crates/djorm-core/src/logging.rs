//! Logging integration.
//!
//! Provides [`setup_logging`] to install a [`tracing`] subscriber from
//! [`Settings`](crate::settings::Settings) and [`query_span`] for per-verb
//! spans. Compiled SQL is emitted under the [`SQL_TARGET`] target.

use crate::settings::Settings;

/// Tracing target used for compiled statements.
pub const SQL_TARGET: &str = "djorm::sql";

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`; when `settings.log_sql` is
/// set, `djorm::sql=debug` is appended so statements are logged regardless of
/// the base level. Debug mode uses a pretty format, otherwise JSON.
///
/// Installing twice is a no-op.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let directives = filter_directives(settings);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

fn filter_directives(settings: &Settings) -> String {
    if settings.log_sql {
        format!("{},{SQL_TARGET}=debug", settings.log_level)
    } else {
        settings.log_level.clone()
    }
}

/// Creates a span for one terminal verb on one table.
///
/// # Examples
///
/// ```
/// use djorm_core::logging::query_span;
///
/// let span = query_span("all", "todos");
/// let _guard = span.enter();
/// tracing::debug!("materializing rows");
/// ```
pub fn query_span(verb: &str, table: &str) -> tracing::Span {
    tracing::debug_span!("query", verb = verb, table = table)
}
