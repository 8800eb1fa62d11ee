//! Per-run trace buffer.
//!
//! Run-scoped events (started, fetched, committed) land in recording order.
//! Message-scoped events land in a block reserved with
//! [`TraceRecorder::begin_messages`], grouped per message in fetch order,
//! so concurrent classification does not interleave the trace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::TraceEvent;

#[derive(Clone, Default)]
pub struct TraceRecorder {
    inner: Arc<Mutex<TraceBuffer>>,
}

#[derive(Default)]
struct TraceBuffer {
    entries: Vec<Entry>,
    by_message: HashMap<String, Vec<TraceEvent>>,
}

enum Entry {
    Event(TraceEvent),
    Messages(Vec<String>),
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, TraceBuffer> {
        // a panicking recorder must not lose the rest of the trace
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve the slot where per-message events will appear.
    pub fn begin_messages<I, S>(&self, message_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = message_ids.into_iter().map(Into::into).collect();
        let mut buf = self.buffer();
        for id in &ids {
            buf.by_message.entry(id.clone()).or_default();
        }
        buf.entries.push(Entry::Messages(ids));
    }

    pub fn record(&self, event: TraceEvent) {
        let mut buf = self.buffer();
        let bucket = event
            .step
            .message_id()
            .filter(|id| buf.by_message.contains_key(*id))
            .map(str::to_owned);
        match bucket {
            Some(id) => buf.by_message.entry(id).or_default().push(event),
            None => buf.entries.push(Entry::Event(event)),
        }
    }

    /// Ordered copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        let buf = self.buffer();
        let mut out = Vec::new();
        for entry in &buf.entries {
            match entry {
                Entry::Event(event) => out.push(event.clone()),
                Entry::Messages(ids) => {
                    for id in ids {
                        if let Some(events) = buf.by_message.get(id) {
                            out.extend(events.iter().cloned());
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        let buf = self.buffer();
        let inline = buf
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Event(_)))
            .count();
        inline + buf.by_message.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
