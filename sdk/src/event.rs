//! Event and breadcrumb records
//!
//! An [`Event`] is built once by the pipeline from producer-supplied
//! [`EventData`] and then shared as `Arc<Event>` until it is delivered or
//! dropped. Nothing mutates it after construction.
//!
//! ```text
//! Producer ──► EventData ──► Pipeline::capture ──► Arc<Event> (+ breadcrumb snapshot)
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Event category, used for rate limiting and client reports
///
/// # Example
///
/// ```
/// use vigil_sdk::event::Category;
///
/// assert_eq!(Category::from("error"), Category::Error);
/// assert_eq!(Category::from("profile").as_str(), "profile");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Default,
    Error,
    Transaction,
    Session,
    Attachment,
    /// Any category the SDK has no dedicated variant for
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Default => "default",
            Category::Error => "error",
            Category::Transaction => "transaction",
            Category::Session => "session",
            Category::Attachment => "attachment",
            Category::Other(name) => name,
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s {
            "default" => Category::Default,
            "error" => Category::Error,
            "transaction" => Category::Transaction,
            "session" => Category::Session,
            "attachment" => Category::Attachment,
            other => Category::Other(other.to_string()),
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from(s.as_str())
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level of a breadcrumb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

/// A lightweight record of a prior action, attached to later events for context
///
/// # Example
///
/// ```
/// use vigil_sdk::event::{Breadcrumb, Level};
///
/// let crumb = Breadcrumb::new("ui.click", "button#submit")
///     .with_level(Level::Info)
///     .with_data("x", 10);
/// assert_eq!(crumb.category.as_deref(), Some("ui.click"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Rendering hint ("default", "http", "navigation", ...)
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub level: Level,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

fn default_type() -> String {
    "default".to_string()
}

impl Default for Breadcrumb {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            ty: default_type(),
            category: None,
            message: None,
            level: Level::default(),
            data: Map::new(),
        }
    }
}

impl Breadcrumb {
    /// Create a breadcrumb stamped with the current time
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = ty.into();
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add one entry to the data map
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Context captured alongside an event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachments {
    /// Breadcrumb snapshot taken at capture time, oldest first
    pub breadcrumbs: Vec<Breadcrumb>,
    pub contexts: Map<String, Value>,
}

/// An immutable telemetry event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique identifier (ULID)
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Opaque structured payload
    pub payload: Map<String, Value>,
    pub attachments: Attachments,
}

/// Raw producer input for [`crate::Pipeline::capture`]
///
/// # Example
///
/// ```
/// use vigil_sdk::event::{Category, EventData};
///
/// let data = EventData::message(Category::Error, "boom")
///     .with_field("handled", false)
///     .with_context("browser", serde_json::json!({"name": "Firefox"}));
/// assert_eq!(data.payload["message"], "boom");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub category: Category,
    pub payload: Map<String, Value>,
    /// Defaults to capture time when unset
    pub timestamp: Option<DateTime<Utc>>,
    pub contexts: Map<String, Value>,
}

impl EventData {
    pub fn new(category: impl Into<Category>, payload: Map<String, Value>) -> Self {
        Self {
            category: category.into(),
            payload,
            timestamp: None,
            contexts: Map::new(),
        }
    }

    /// Event whose payload carries only a `message` field
    pub fn message(category: impl Into<Category>, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self::new(category, payload)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set a top-level payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.contexts.insert(key.into(), value.into());
        self
    }

    /// Extract event data from an untrusted JSON value
    ///
    /// Expects an object with an optional `category` string (default
    /// `"default"`), an optional `payload` object, an optional `contexts`
    /// object and an optional `timestamp` given either as RFC 3339 text or as
    /// fractional Unix seconds. Returns `None` when the shape is unusable.
    pub fn from_json(value: Value) -> Option<Self> {
        let Value::Object(mut obj) = value else {
            return None;
        };

        let category = match obj.remove("category") {
            None => Category::Default,
            Some(Value::String(s)) if !s.is_empty() => Category::from(s),
            Some(_) => return None,
        };

        let payload = match obj.remove("payload") {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return None,
        };

        let contexts = match obj.remove("contexts") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let timestamp = obj.remove("timestamp").and_then(|ts| parse_timestamp(&ts));

        Some(Self {
            category,
            payload,
            timestamp,
            contexts,
        })
    }

    /// Build the final event, stamping id and timestamp
    pub(crate) fn into_event(self, breadcrumbs: Vec<Breadcrumb>) -> Event {
        Event {
            id: ulid::Ulid::new().to_string(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            category: self.category,
            payload: self.payload,
            attachments: Attachments {
                breadcrumbs,
                contexts: self.contexts,
            },
        }
    }
}

/// Accepts RFC 3339 strings or Unix seconds (integer or fractional)
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() || secs < 0.0 {
                return None;
            }
            let millis = (secs * 1000.0) as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}
