//! Lock-free span capture.
//!
//! A session pre-allocates a fixed number of [`EventSlot`]s. Every call to
//! [`EventRecorder::trace`] claims the next slot with a single atomic increment and
//! writes only to that slot, so producers never block or contend beyond the counter.
//! Once the slots run out further events are dropped. Nothing is serialized until
//! [`EventRecorder::finish`], which requires exclusive access and therefore cannot
//! overlap with producers.

use crate::capture::Capture;
use crate::encoder::TraceEncoder;
use crate::error::{Error, Result};
use crate::item::WorkItem;
use crate::types::{Capacity, SectionThreshold};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{debug, error, warn};

/// Any seekable stream a trace can be written to.
pub trait TraceSink: Write + Seek + Send + Sync {}

impl<T: Write + Seek + Send + Sync> TraceSink for T {}

/// Where a session's trace ends up.
pub enum Destination {
    /// An already open stream, written to at finish.
    Stream(Box<dyn TraceSink>),
    /// A file created (or truncated) at finish.
    Path(PathBuf),
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Stream(_) => f.write_str("Stream"),
            Destination::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

impl From<PathBuf> for Destination {
    fn from(p: PathBuf) -> Self {
        Destination::Path(p)
    }
}

const UNSET: u64 = u64::MAX;

/// Storage for one captured span.
#[derive(Debug)]
pub struct EventSlot<P> {
    start: AtomicU64,
    stop: AtomicU64,
    payload: OnceLock<P>,
}

impl<P> EventSlot<P> {
    fn new() -> Self {
        Self {
            start: AtomicU64::new(0),
            stop: AtomicU64::new(UNSET),
            payload: OnceLock::new(),
        }
    }

    pub fn start_ns(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    /// `None` while the span is still open.
    pub fn stop_ns(&self) -> Option<u64> {
        match self.stop.load(Ordering::Acquire) {
            UNSET => None,
            ns => Some(ns),
        }
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.get()
    }
}

/// Closes its span when dropped.
///
/// A handle returned while the recorder has no free slot (or no session) is inert:
/// closing it does nothing.
#[must_use = "the span is closed as soon as the handle is dropped"]
pub struct SpanHandle<'a, C: Capture> {
    slot: Option<&'a EventSlot<C::Payload>>,
    capture: &'a C,
}

impl<C: Capture> SpanHandle<'_, C> {
    /// Stamp the stop time. Only the first call has an effect.
    pub fn close(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.stop.store(self.capture.now(), Ordering::Release);
        }
    }

    /// False for inert handles and for spans already closed.
    pub fn is_recording(&self) -> bool {
        self.slot.is_some()
    }
}

impl<C: Capture> Drop for SpanHandle<'_, C> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Session<P> {
    slots: Box<[EventSlot<P>]>,
    claimed: AtomicUsize,
    /// Claim count at the first `disable`, `usize::MAX` while enabled.
    sealed: AtomicUsize,
    destination: Destination,
    started_at_ns: u64,
}

impl<P> Session<P> {
    fn new(destination: Destination, capacity: usize, started_at_ns: u64) -> Self {
        Self {
            slots: (0..capacity).map(|_| EventSlot::new()).collect(),
            claimed: AtomicUsize::new(0),
            sealed: AtomicUsize::new(usize::MAX),
            destination,
            started_at_ns,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn seal(&self) {
        let claimed = self.claimed.swap(self.capacity(), Ordering::AcqRel);
        self.sealed.fetch_min(claimed, Ordering::AcqRel);
    }

    fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire) != usize::MAX
    }

    /// Number of slots holding captured spans.
    fn filled(&self) -> usize {
        self.sealed
            .load(Ordering::Acquire)
            .min(self.claimed.load(Ordering::Acquire))
            .min(self.capacity())
    }
}

/// Fixed-capacity span recorder.
///
/// ```no_run
/// use profane::prelude::*;
///
/// let mut rec = EventRecorder::new(ActorCapture::new());
/// rec.enable(Destination::Path("trace.profane".into()), Capacity(1024))?;
/// {
///     let _span = rec.trace(ActorEvent::new("Main.work", 0)?);
/// }
/// rec.finish("example", "")?;
/// # Ok::<(), profane::error::Error>(())
/// ```
pub struct EventRecorder<C: Capture> {
    capture: C,
    session: Option<Session<C::Payload>>,
    threshold: SectionThreshold,
    program_name: String,
    description: String,
}

impl<C: Capture> EventRecorder<C> {
    pub fn new(capture: C) -> Self {
        Self {
            capture,
            session: None,
            threshold: SectionThreshold::default(),
            program_name: String::new(),
            description: String::new(),
        }
    }

    pub fn with_section_threshold(mut self, threshold: SectionThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    /// Names written to the manifest when the recorder finishes on drop.
    pub fn describe(mut self, program_name: &str, description: &str) -> Self {
        self.program_name = program_name.to_owned();
        self.description = description.to_owned();
        self
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// True while a session accepts events.
    pub fn is_enabled(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_sealed())
    }

    pub fn capacity(&self) -> usize {
        self.session.as_ref().map_or(0, Session::capacity)
    }

    /// Events captured so far, excluding dropped ones.
    pub fn captured(&self) -> usize {
        self.session.as_ref().map_or(0, Session::filled)
    }

    /// Start a session with `capacity` slots.
    ///
    /// A disabled session that was never finished is discarded.
    pub fn enable(&mut self, destination: Destination, capacity: Capacity) -> Result<()> {
        if let Some(session) = &self.session {
            if !session.is_sealed() {
                return Err(Error::AlreadyEnabled);
            }
            debug!(
                discarded = session.filled(),
                "Replacing disabled recorder session"
            );
        }
        let capacity = u32::from(capacity) as usize;
        debug!(capacity, ?destination, "Enabling recorder");
        self.session = Some(Session::new(destination, capacity, self.capture.now()));
        Ok(())
    }

    /// Open a span. Never blocks, and never allocates beyond the payload itself.
    pub fn trace(&self, payload: C::Payload) -> SpanHandle<'_, C> {
        let slot = self.session.as_ref().and_then(|session| {
            let idx = session.claimed.fetch_add(1, Ordering::AcqRel);
            session.slots.get(idx)
        });
        if let Some(slot) = slot {
            slot.start.store(self.capture.now(), Ordering::Release);
            // Each slot is claimed exactly once
            let _ = slot.payload.set(payload);
        }
        SpanHandle {
            slot,
            capture: &self.capture,
        }
    }

    /// Stop accepting events. Spans already open can still be closed and are kept.
    pub fn disable(&self) {
        if let Some(session) = &self.session {
            session.seal();
        }
    }

    /// Write every captured span to the session's destination and end the session.
    ///
    /// Spans that were never closed end at the time of this call. Returns the number
    /// of work items written, zero when there is no session.
    pub fn finish(&mut self, program_name: &str, description: &str) -> Result<usize> {
        let session = match self.session.take() {
            Some(s) => s,
            None => return Ok(0),
        };
        let finish_ns = self.capture.now();
        let was_sealed = session.is_sealed();
        let claimed = session.claimed.load(Ordering::Acquire);
        let filled = session.filled();
        if !was_sealed && claimed > session.capacity() {
            warn!(
                dropped = claimed - session.capacity(),
                capacity = session.capacity(),
                "Recorder ran out of event slots"
            );
        }

        let slots = &session.slots[..filled];
        let written = match session.destination {
            Destination::Stream(out) => {
                self.encode(out, slots, finish_ns, program_name, description)?
            }
            Destination::Path(ref path) => {
                let out = BufWriter::new(File::create(path)?);
                self.encode(out, slots, finish_ns, program_name, description)?
            }
        };
        debug!(
            written,
            elapsed_ns = finish_ns.saturating_sub(session.started_at_ns),
            "Finished recorder session"
        );
        Ok(written)
    }

    fn encode<W: Write + Seek>(
        &self,
        out: W,
        slots: &[EventSlot<C::Payload>],
        finish_ns: u64,
        program_name: &str,
        description: &str,
    ) -> Result<usize> {
        let mut enc =
            TraceEncoder::with_threshold(out, program_name, description, self.threshold)?;
        let mut written = 0;
        for slot in slots {
            let payload = match slot.payload() {
                Some(p) => p,
                None => continue,
            };
            let fields = self.capture.transform(payload)?;
            let start = slot.start_ns();
            // Clamped for clocks that step backwards
            let stop = slot.stop_ns().unwrap_or(finish_ns).max(start);
            enc.write_work_item(&WorkItem::new(start, stop, fields))?;
            written += 1;
        }
        let mut out = enc.finish()?;
        out.flush()?;
        Ok(written)
    }
}

impl<C: Capture> Drop for EventRecorder<C> {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        let program_name = std::mem::take(&mut self.program_name);
        let description = std::mem::take(&mut self.description);
        if let Err(e) = self.finish(&program_name, &description) {
            error!("Failed to write trace on drop: {e}");
        }
    }
}
