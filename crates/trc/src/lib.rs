//! Structured event logging, in the shape of the teacher's own `trc` crate:
//! every event is a typed enum variant carrying `key = value` pairs, rather
//! than an ad-hoc format string. Keeps the event set this system actually
//! emits (LMTP, classifier, forwarder, spool, checkback, socketmap, store)
//! and drops the teacher's OTEL/webhook/Sentry exporters in favor of a
//! single JSON-lines sink, since outer observability surfaces are out of
//! scope here.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

mod subscriber;

pub use subscriber::{Collector, JsonLineSubscriber, NullSubscriber, Subscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_u8(self) -> u8 {
        match self {
            Level::Trace => 0,
            Level::Debug => 1,
            Level::Info => 2,
            Level::Warn => 3,
            Level::Error => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    LmtpConnect,
    LmtpDisconnect,
    LmtpRejected,
    LmtpAccepted,
    ClassifyResult,
    ForwardSent,
    ForwardFailed,
    SpoolSaved,
    SpoolNotifyFailed,
    CheckbackSent,
    CheckbackRateLimited,
    CheckbackValidated,
    CheckbackRejected,
    SocketmapQuery,
    StoreError,
    GdprJoinLeave,
}

impl EventType {
    pub fn default_level(self) -> Level {
        use EventType::*;
        match self {
            LmtpRejected | ForwardFailed | SpoolNotifyFailed | CheckbackRejected | StoreError => {
                Level::Warn
            }
            LmtpConnect | LmtpDisconnect | LmtpAccepted | ClassifyResult | ForwardSent
            | SpoolSaved | CheckbackSent | CheckbackRateLimited | CheckbackValidated
            | SocketmapQuery | GdprJoinLeave => Level::Info,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    UInt(u64),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub typ: EventType,
    pub level: Level,
    pub keys: AHashMap<&'static str, Value>,
}

impl Event {
    pub fn new(typ: EventType) -> Self {
        Event {
            level: typ.default_level(),
            typ,
            keys: AHashMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.keys.insert(key, value.into());
        self
    }

    pub fn at(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Hands the event to the process-wide collector. Mirrors the teacher's
    /// `Event::send()` — a fire-and-forget call sites use instead of
    /// threading a logger handle everywhere.
    pub fn send(self) {
        Collector::global().collect(self);
    }
}

/// Minimum level that reaches the collector; changeable at runtime so tests
/// can silence noisy paths.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(0);

pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level.as_u8(), Ordering::Relaxed);
}

pub(crate) fn min_level() -> u8 {
    MIN_LEVEL.load(Ordering::Relaxed)
}

static GLOBAL: RwLock<Option<std::sync::Arc<dyn Subscriber>>> = RwLock::new(None);

/// Installs the process-wide subscriber. Call once at startup; later calls
/// replace the previous subscriber (useful in tests).
pub fn install(subscriber: std::sync::Arc<dyn Subscriber>) {
    *GLOBAL.write() = Some(subscriber);
}

pub(crate) fn installed() -> Option<std::sync::Arc<dyn Subscriber>> {
    GLOBAL.read().clone()
}

#[macro_export]
macro_rules! event {
    ($typ:expr $(, $key:expr => $val:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut ev = $crate::Event::new($typ);
        $( ev = ev.with($key, $val); )*
        ev.send();
    }};
}
