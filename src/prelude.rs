pub use crate::capture::{ActorCapture, ActorEvent, AnchoredClock, Capture};
pub use crate::config::{InspectConfig, ProfaneConfig, RecorderConfig};
pub use crate::decoder::{Issue, IssueCode, TraceFile};
pub use crate::encoder::TraceEncoder;
pub use crate::item::{PackedWorkItem, ResolvedFields, WorkItem};
pub use crate::opts::{ConfigOpts, InspectOpts, RecorderOpts};
pub use crate::recorder::{Destination, EventRecorder, SpanHandle, TraceSink};
pub use crate::types::{Capacity, Interruptor, SectionThreshold};
