//! Wire encoding for outbound batches
//!
//! An envelope is newline-delimited JSON: a header line followed by one line
//! per item.
//!
//! ```text
//! {"item_count":2,"sent_at":"2024-03-01T12:00:00Z"}
//! {"type":"event","event_id":"01HQ...","timestamp":"...","category":"error","payload":{...},"breadcrumbs":[...],"contexts":{...}}
//! {"type":"client_report","timestamp":"...","discarded_events":[{"reason":"queue_overflow","category":"error","quantity":3}]}
//! ```
//!
//! The body is encoded once when the envelope is sealed and shared as
//! [`Bytes`], so retries and multiple transports never re-serialize.

use crate::client_report::ClientReport;
use crate::error::Result;
use crate::event::{Breadcrumb, Category, Event};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// MIME type of an encoded envelope
pub const CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Serialize)]
struct Header {
    item_count: usize,
    sent_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct EventItem<'a> {
    event_id: &'a str,
    timestamp: DateTime<Utc>,
    category: &'a Category,
    payload: &'a Map<String, Value>,
    breadcrumbs: &'a [Breadcrumb],
    contexts: &'a Map<String, Value>,
}

impl<'a> From<&'a Event> for EventItem<'a> {
    fn from(e: &'a Event) -> Self {
        Self {
            event_id: &e.id,
            timestamp: e.timestamp,
            category: &e.category,
            payload: &e.payload,
            breadcrumbs: &e.attachments.breadcrumbs,
            contexts: &e.attachments.contexts,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Item<'a> {
    Event(EventItem<'a>),
    ClientReport(&'a ClientReport),
}

/// A sealed batch ready for a [`crate::transport::Transport`]
#[derive(Debug, Clone)]
pub struct Envelope {
    events: Vec<Arc<Event>>,
    client_report: Option<ClientReport>,
    sent_at: DateTime<Utc>,
    body: Bytes,
}

impl Envelope {
    /// Encode a batch stamped with the current time
    pub fn seal(events: Vec<Arc<Event>>, client_report: Option<ClientReport>) -> Result<Self> {
        Self::seal_at(events, client_report, Utc::now())
    }

    /// Encode a batch with an explicit `sent_at`
    pub fn seal_at(
        events: Vec<Arc<Event>>,
        client_report: Option<ClientReport>,
        sent_at: DateTime<Utc>,
    ) -> Result<Self> {
        let item_count = events.len() + usize::from(client_report.is_some());
        let mut buf = Vec::with_capacity(256 * item_count.max(1));

        serde_json::to_writer(
            &mut buf,
            &Header {
                item_count,
                sent_at,
            },
        )?;
        buf.push(b'\n');

        for event in &events {
            serde_json::to_writer(&mut buf, &Item::Event(EventItem::from(event.as_ref())))?;
            buf.push(b'\n');
        }

        if let Some(report) = &client_report {
            serde_json::to_writer(&mut buf, &Item::ClientReport(report))?;
            buf.push(b'\n');
        }

        Ok(Self {
            events,
            client_report,
            sent_at,
            body: Bytes::from(buf),
        })
    }

    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn client_report(&self) -> Option<&ClientReport> {
        self.client_report.as_ref()
    }

    /// Number of item lines (events plus client report)
    pub fn item_count(&self) -> usize {
        self.events.len() + usize::from(self.client_report.is_some())
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Encoded body (cheap to clone)
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Distinct event categories in this batch
    pub fn categories(&self) -> BTreeSet<Category> {
        self.events.iter().map(|e| e.category.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}
