//! Pluggable clock and payload transform used by [`EventRecorder`](crate::recorder::EventRecorder).

use crate::error::{Error, Result};
use crate::item::ResolvedFields;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// What a recorder needs to know about its events.
///
/// `now` is read on the hot path by every producer. `transform` only runs at finish,
/// once per captured event.
pub trait Capture: Send + Sync {
    type Payload: Send + Sync;

    /// Current time in nanoseconds. Must be monotonic within one recorder session.
    fn now(&self) -> u64;

    fn transform(&self, payload: &Self::Payload) -> Result<ResolvedFields>;
}

/// Monotonic clock reported as nanoseconds since the UNIX epoch.
///
/// The wall clock is sampled once at construction and advanced with [`Instant`],
/// so timestamps never go backwards even if the system time is adjusted.
#[derive(Copy, Clone, Debug)]
pub struct AnchoredClock {
    real_ns: u64,
    mono: Instant,
}

impl AnchoredClock {
    pub fn new() -> Self {
        let real_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            real_ns,
            mono: Instant::now(),
        }
    }

    pub fn now(&self) -> u64 {
        self.real_ns
            .saturating_add(self.mono.elapsed().as_nanos() as u64)
    }
}

impl Default for AnchoredClock {
    fn default() -> Self {
        Self::new()
    }
}

/// An event named `"<worker>.<routine>"`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ActorEvent {
    name: &'static str,
    task_id: u32,
}

impl ActorEvent {
    pub fn new(name: &'static str, task_id: u32) -> Result<Self> {
        split_worker_routine(name)?;
        Ok(Self { name, task_id })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn task_id(&self) -> u32 {
        self.task_id
    }
}

/// Capture for actor-style programs: the worker and routine come from the event
/// name, category and comment stay empty.
#[derive(Clone, Debug, Default)]
pub struct ActorCapture {
    clock: AnchoredClock,
}

impl ActorCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Capture for ActorCapture {
    type Payload = ActorEvent;

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn transform(&self, payload: &ActorEvent) -> Result<ResolvedFields> {
        let (worker, routine) = split_worker_routine(payload.name)?;
        Ok(ResolvedFields {
            worker: worker.to_owned(),
            routine: routine.to_owned(),
            task_id: payload.task_id,
            ..Default::default()
        })
    }
}

/// Split at the first `'.'`. Either side may be empty.
pub fn split_worker_routine(name: &str) -> Result<(&str, &str)> {
    name.split_once('.')
        .ok_or_else(|| Error::MalformedWorkerRoutineName(name.to_owned()))
}
