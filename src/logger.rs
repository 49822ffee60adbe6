//! Structured logging with request-scoped context propagation.
//!
//! A [`Logger`] is a cheap, cloneable value: a `tracing` dispatcher plus the
//! context span whose fields decorate every line it emits. Loggers never
//! share mutable state; deriving a child returns a new value and leaves the
//! parent untouched, so concurrent requests each carry their own copy.
//!
//! # Context Propagation
//!
//! Loggers travel with a request inside its [`Extensions`], stored under a
//! private key type so no other extension can collide with it:
//!
//! ```rust,ignore
//! logger::attach(req.extensions_mut(), log.with_request_id("abc"));
//! // ...later, in a handler or another middleware
//! let log = logger::from_extensions(req.extensions());
//! log.info("charging card");
//! ```
//!
//! Retrieving from extensions with nothing attached yields [`Logger::nop`],
//! so callers never need to check.
//!
//! # Output
//!
//! Lines go to stdout. `LOG_FORMAT=json` selects JSON lines; any other value
//! selects the human-readable console format. The format is read once, when
//! the logger is created.
//!
//! In JSON, context fields are top-level keys next to the message:
//!
//! ```text
//! {"level":"INFO","message":"upgraded","service":"orders","user_id":42,...}
//! ```

mod json;

use std::convert::Infallible;
use std::io;

use axum::extract::FromRequestParts;
use axum::http::Extensions;
use axum::http::request::Parts;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::NoSubscriber;
use serde_json::{Map, Value};
use tracing::{Dispatch, Span};
use tracing_subscriber::Registry;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::registry::LookupSpan;

use json::{ExtraFields, FlatJson};

/// Emit an event at a level only known at runtime.
///
/// `tracing` macros need a constant level, so this expands to one arm per level.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            ::tracing::Level::ERROR => ::tracing::error!($($arg)+),
            ::tracing::Level::WARN => ::tracing::warn!($($arg)+),
            ::tracing::Level::INFO => ::tracing::info!($($arg)+),
            ::tracing::Level::DEBUG => ::tracing::debug!($($arg)+),
            _ => ::tracing::trace!($($arg)+),
        }
    };
}

pub(crate) use log_at;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable console output.
    #[default]
    Console,
}

impl LogFormat {
    /// `"json"` selects JSON; everything else selects console output.
    pub fn parse(value: &str) -> Self {
        if value == "json" {
            Self::Json
        } else {
            Self::Console
        }
    }

    /// Read the format from `LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::parse(&crate::config::get_env("LOG_FORMAT", "console"))
    }
}

/// Process-wide logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum level name ("trace", "debug", "info", "warn", "error")
    pub level: String,
    /// Value of the `service` field on every line
    pub service_name: String,
    /// Output format
    pub format: LogFormat,
}

/// Map a level name to a filter. Unknown names mean `info`.
///
/// `fatal` and `panic` have no `tracing` counterpart and map to `error`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" | "fatal" | "panic" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// A structured logger bound to a service and an optional request context.
#[derive(Debug, Clone)]
pub struct Logger {
    dispatch: Dispatch,
    span: Span,
}

impl Logger {
    /// Create a stdout logger; the format comes from `LOG_FORMAT`.
    pub fn new(level: &str, service_name: &str) -> Self {
        Self::from_config(&LogConfig {
            level: level.to_string(),
            service_name: service_name.to_string(),
            format: LogFormat::from_env(),
        })
    }

    /// Create a stdout logger from explicit settings.
    pub fn from_config(config: &LogConfig) -> Self {
        Self::with_writer(config, io::stdout)
    }

    /// Create a logger that writes to `writer` instead of stdout.
    pub fn with_writer<W>(config: &LogConfig, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let builder = tracing_subscriber::fmt()
            .with_max_level(parse_level(&config.level))
            .with_writer(writer);

        let dispatch = match config.format {
            LogFormat::Json => Dispatch::new(
                builder
                    .fmt_fields(JsonFields::new())
                    .event_format(FlatJson)
                    .finish(),
            ),
            LogFormat::Console => Dispatch::new(builder.finish()),
        };

        // Context spans are created at ERROR so no level filter drops their fields.
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::error_span!("service", service = %config.service_name)
        });

        Self { dispatch, span }
    }

    /// A logger that discards everything.
    pub fn nop() -> Self {
        Self {
            dispatch: Dispatch::none(),
            span: Span::none(),
        }
    }

    /// Whether this logger writes anywhere.
    pub fn is_enabled(&self) -> bool {
        !self.dispatch.is::<NoSubscriber>()
    }

    /// Run `f` with this logger as the current dispatcher and its context entered.
    ///
    /// Plain `tracing` macros inside `f` emit through this logger.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }

    /// Derive a logger whose context is the span returned by `make_span`.
    ///
    /// The span is created inside this logger's scope, so it nests under the
    /// current context and inherits its fields.
    pub fn child(&self, make_span: impl FnOnce() -> Span) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            span: self.in_scope(make_span),
        }
    }

    /// Derive a logger carrying additional fields.
    ///
    /// Values keep their JSON type, so `("user_id", 42)` logs a number. A key
    /// already present in the context is replaced for this logger only.
    pub fn with_fields<I, K, V>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields: Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let rendered = fields
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(" ");

        let child = self.child(|| tracing::error_span!("fields", fields = %rendered));
        child.store_extra(fields);
        child
    }

    /// Keep typed fields on the context span for the JSON formatter.
    fn store_extra(&self, fields: Map<String, Value>) {
        if let Some(id) = self.span.id()
            && let Some(registry) = self.dispatch.downcast_ref::<Registry>()
            && let Some(span) = registry.span(&id)
        {
            span.extensions_mut().insert(ExtraFields(fields));
        }
    }

    /// Derive a logger carrying a `request_id` field.
    pub fn with_request_id(&self, request_id: &str) -> Self {
        self.child(|| tracing::error_span!("request", request_id = %request_id))
    }

    /// Emit `message` at `level`.
    pub fn log(&self, level: tracing::Level, message: &str) {
        self.in_scope(|| log_at!(level, "{message}"));
    }

    pub fn trace(&self, message: &str) {
        self.log(tracing::Level::TRACE, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(tracing::Level::DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(tracing::Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(tracing::Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.log(tracing::Level::ERROR, message);
    }

    /// Make this logger the process-wide default for plain `tracing` macros.
    ///
    /// # Errors
    ///
    /// Returns `KitError::Logger` if a global default was already installed.
    pub fn install_global(&self) -> crate::KitResult<()> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())?;
        Ok(())
    }
}

/// Private key type for the logger stored in request extensions.
#[derive(Clone)]
struct ContextLogger(Logger);

/// Attach `log` to a request's extensions, replacing any previous logger.
pub fn attach(extensions: &mut Extensions, log: Logger) {
    extensions.insert(ContextLogger(log));
}

/// The logger attached to `extensions`, or a no-op logger.
pub fn from_extensions(extensions: &Extensions) -> Logger {
    extensions
        .get::<ContextLogger>()
        .map(|c| c.0.clone())
        .unwrap_or_else(Logger::nop)
}

/// Add fields to the attached logger and re-attach it.
pub fn with_fields<I, K, V>(extensions: &mut Extensions, fields: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let log = from_extensions(extensions).with_fields(fields);
    attach(extensions, log);
}

/// Add a `request_id` field to the attached logger and re-attach it.
pub fn with_request_id(extensions: &mut Extensions, request_id: &str) {
    let log = from_extensions(extensions).with_request_id(request_id);
    attach(extensions, log);
}

/// Handlers can take the request logger directly as an extractor.
impl<S> FromRequestParts<S> for Logger
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(from_extensions(&parts.extensions))
    }
}

/// Log capture for unit tests across the crate.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        pub(crate) fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    /// A JSON logger for service `orders` writing into a [`Capture`].
    pub(crate) fn json_logger(level: &str) -> (Logger, Capture) {
        let capture = Capture::default();
        let writer = capture.clone();
        let config = LogConfig {
            level: level.to_string(),
            service_name: "orders".to_string(),
            format: LogFormat::Json,
        };
        (Logger::with_writer(&config, move || writer.clone()), capture)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::testing::json_logger;
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), LevelFilter::TRACE);
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("warn"), LevelFilter::WARN);
        assert_eq!(parse_level("fatal"), LevelFilter::ERROR);
        assert_eq!(parse_level("panic"), LevelFilter::ERROR);
        assert_eq!(parse_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Console);
        assert_eq!(LogFormat::parse(""), LogFormat::Console);
    }

    #[test]
    fn test_lines_carry_service_and_level() {
        let (log, capture) = json_logger("info");
        log.info("started");

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["message"], "started");
        assert_eq!(lines[0]["service"], "orders");
        assert!(lines[0]["timestamp"].is_string());
        assert!(lines[0].get("spans").is_none());
    }

    #[test]
    fn test_records_below_level_are_dropped() {
        let (log, capture) = json_logger("warn");
        log.debug("noise");
        log.info("noise");
        log.warn("kept");
        log.error("kept");

        let levels: Vec<_> = capture
            .lines()
            .iter()
            .map(|l| l["level"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(levels, vec!["WARN", "ERROR"]);
    }

    #[test]
    fn test_child_loggers_do_not_touch_parent() {
        let (log, capture) = json_logger("info");
        let child = log.with_request_id("req-7");

        child.info("from child");
        log.info("from parent");

        let lines = capture.lines();
        assert_eq!(lines[0]["request_id"], "req-7");
        assert_eq!(lines[0]["service"], "orders");
        assert!(lines[1].get("request_id").is_none());
    }

    #[test]
    fn test_with_fields_are_top_level_keys() {
        let (log, capture) = json_logger("info");
        log.with_fields([("user_id", Value::from(42)), ("plan", Value::from("pro"))])
            .info("upgraded");

        let line = &capture.lines()[0];
        assert_eq!(line["user_id"], 42);
        assert_eq!(line["plan"], "pro");
        assert_eq!(line["service"], "orders");
        assert_eq!(line["message"], "upgraded");
    }

    #[test]
    fn test_later_fields_replace_earlier_ones() {
        let (log, capture) = json_logger("info");
        let base = log.with_fields([("plan", "free")]);
        base.with_fields([("plan", "pro")]).info("upgraded");
        base.info("unchanged");

        let lines = capture.lines();
        assert_eq!(lines[0]["plan"], "pro");
        assert_eq!(lines[1]["plan"], "free");
    }

    #[test]
    fn test_event_fields_keep_their_types() {
        let (log, capture) = json_logger("info");
        log.in_scope(|| tracing::info!(ok = true, ratio = 0.5, name = "x", "typed"));

        let line = &capture.lines()[0];
        assert_eq!(line["ok"], true);
        assert_eq!(line["ratio"], 0.5);
        assert_eq!(line["name"], "x");
    }

    #[test]
    fn test_from_empty_extensions_is_nop() {
        let extensions = Extensions::new();
        let log = from_extensions(&extensions);

        assert!(!log.is_enabled());
        // Must not panic
        log.error("dropped");
        log.with_request_id("x").info("dropped");
    }

    #[test]
    fn test_attach_and_extend_in_extensions() {
        let (log, capture) = json_logger("info");
        let mut extensions = Extensions::new();

        attach(&mut extensions, log);
        with_request_id(&mut extensions, "abc");
        with_fields(&mut extensions, [("tenant", "acme")]);

        let log = from_extensions(&extensions);
        assert!(log.is_enabled());
        log.info("hello");

        let line = &capture.lines()[0];
        assert_eq!(line["request_id"], "abc");
        assert_eq!(line["tenant"], "acme");
    }

    #[test]
    fn test_in_scope_routes_plain_macros() {
        let (log, capture) = json_logger("info");
        log.in_scope(|| tracing::warn!(attempt = 3, "retrying"));

        let line = &capture.lines()[0];
        assert_eq!(line["level"], "WARN");
        assert_eq!(line["attempt"], 3);
    }
}
