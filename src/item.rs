/// Categorical fields a transform derives from an event payload.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ResolvedFields {
    pub category: String,
    pub worker: String,
    pub routine: String,
    pub comment: String,
    pub task_id: u32,
}

/// A finished span with its strings resolved.
///
/// This is what the encoder consumes and what [`TraceFile::resolve`] produces.
///
/// [`TraceFile::resolve`]: crate::decoder::TraceFile::resolve
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct WorkItem {
    pub start_ns: u64,
    pub stop_ns: u64,
    pub category: String,
    pub worker: String,
    pub routine: String,
    pub comment: String,
    pub task_id: u32,
}

impl WorkItem {
    pub fn new(start_ns: u64, stop_ns: u64, fields: ResolvedFields) -> Self {
        Self {
            start_ns,
            stop_ns,
            category: fields.category,
            worker: fields.worker,
            routine: fields.routine,
            comment: fields.comment,
            task_id: fields.task_id,
        }
    }

    pub fn duration_ns(&self) -> u64 {
        self.stop_ns.saturating_sub(self.start_ns)
    }
}

/// A work item as stored in a trace file, strings replaced by dictionary indices.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct PackedWorkItem {
    pub start_ns: u64,
    pub stop_ns: u64,
    pub category_idx: u32,
    pub worker_idx: u32,
    pub routine_idx: u32,
    pub comment_idx: u32,
    pub task_id: u32,
}

impl PackedWorkItem {
    pub fn duration_ns(&self) -> u64 {
        self.stop_ns.saturating_sub(self.start_ns)
    }
}
