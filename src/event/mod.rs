//! Event envelopes exchanged on the probe and receiver listeners.
//!
//! The envelope follows the CloudEvents 1.0 attribute set: required `id`,
//! `type` (called `kind` here), `source`, plus optional `time`, `subject`,
//! `datacontenttype`, `data` and free-form string extensions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// HTTP binding (binary and structured content modes).
pub mod binding;

/// The only CloudEvents spec version produced and accepted.
pub const SPEC_VERSION: &str = "1.0";

/// A single event envelope.
///
/// # Examples
///
/// ```
/// use probe_helper::Event;
///
/// let event = Event::new("probe-1", "pingsource-probe", "probe")
///     .with_extension("period", "200ms");
/// assert_eq!(event.extension("period"), Some("200ms"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Unique per envelope instance.
    pub id: String,

    /// Event type; selects the probe kind or delivered-event classification.
    pub kind: String,

    /// Producer of the event.
    pub source: String,

    /// Creation timestamp.
    pub time: Option<DateTime<Utc>>,

    #[allow(missing_docs)]
    pub subject: Option<String>,

    #[allow(missing_docs)]
    pub datacontenttype: Option<String>,

    /// Raw payload bytes.
    pub data: Option<Vec<u8>>,

    /// Extension attributes. Names are lower-case.
    pub extensions: BTreeMap<String, String>,
}

impl Event {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            source: source.into(),
            time: Some(Utc::now()),
            subject: None,
            datacontenttype: None,
            data: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Creates an envelope with a random UUID id.
    #[must_use]
    pub fn with_random_id(kind: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), kind, source)
    }

    /// Sets an extension attribute (name is lower-cased).
    #[must_use]
    pub fn with_extension(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_extension(name, value);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Attaches a payload with its content type.
    #[must_use]
    pub fn with_data(mut self, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.datacontenttype = Some(content_type.into());
        self.data = Some(data.into());
        self
    }

    /// Sets an extension attribute in place.
    pub fn set_extension(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.extensions
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Looks up an extension attribute by name.
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Looks up an extension, treating an empty value as absent.
    #[must_use]
    pub fn non_empty_extension(&self, name: &str) -> Option<&str> {
        self.extension(name).filter(|v| !v.trim().is_empty())
    }
}
