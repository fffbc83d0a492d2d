//! Structured event journal.
//!
//! Phase transitions serialized as newline-delimited JSON (JSONL), each
//! with a monotonically increasing sequence number. The journal records the
//! same total order that observers see.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::phase::{NetRole, PhaseEvent, PhaseEventKind};
use crate::tag::PhaseTag;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A journaled phase event.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A phase entry was started.
    PhaseStarted {
        /// When the transition was delivered.
        timestamp: DateTime<Utc>,
        /// Canonical tag of the entry.
        tag: String,
        /// Handle of the entry (client-local on clients).
        handle: u64,
        /// Parent tag for sub-phases; omitted for root entries.
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        /// Active entries right after the transition.
        active: usize,
        /// Role of the subsystem that recorded it.
        role: NetRole,
    },

    /// A phase entry was ended.
    PhaseEnded {
        /// When the transition was delivered.
        timestamp: DateTime<Utc>,
        /// Canonical tag of the entry.
        tag: String,
        /// Handle of the entry (client-local on clients).
        handle: u64,
        /// Parent tag for sub-phases; omitted for root entries.
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        /// Active entries right after the transition.
        active: usize,
        /// Role of the subsystem that recorded it.
        role: NetRole,
    },

    /// A client applied a replicated snapshot.
    SnapshotApplied {
        /// When the snapshot was applied.
        timestamp: DateTime<Utc>,
        /// The mirrored tags after applying, in start order.
        tags: Vec<String>,
    },
}

impl Event {
    /// Builds the journal record for an observer event; `active` is the
    /// number of entries right after the transition.
    #[must_use]
    pub fn from_phase_event(event: &PhaseEvent, role: NetRole, active: usize) -> Self {
        let timestamp = Utc::now();
        let tag = event.tag.to_string();
        let handle = event.handle.as_raw();
        let parent = event.parent.as_ref().map(ToString::to_string);
        match event.kind {
            PhaseEventKind::Started => Self::PhaseStarted {
                timestamp,
                tag,
                handle,
                parent,
                active,
                role,
            },
            PhaseEventKind::Ended => Self::PhaseEnded {
                timestamp,
                tag,
                handle,
                parent,
                active,
                role,
            },
        }
    }

    /// Builds the journal record for an applied snapshot.
    #[must_use]
    pub fn snapshot_applied(tags: &[PhaseTag]) -> Self {
        Self::SnapshotApplied {
            timestamp: Utc::now(),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// serializes the event as a single JSON line, and flushes the underlying
/// writer. Serialization or I/O failures are dropped; journaling never
/// fails a phase transition.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

// Box<dyn Write> is not Debug
impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let Ok(mut w) = self.writer.lock() else {
            return;
        };
        // sequence is taken under the lock so line order matches numbering
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };
        if let Ok(line) = serde_json::to_string(&envelope) {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
