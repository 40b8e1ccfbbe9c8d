//! # Overview
//!
//! Low-overhead span recording and a compact binary trace format.
//!
//! Producers on any number of threads open spans through an
//! [`EventRecorder`](recorder::EventRecorder). Each span claims one slot of a
//! pre-allocated buffer with a single atomic increment; nothing is serialized until
//! the recorder finishes. At that point every captured span is turned into a
//! [`WorkItem`](item::WorkItem) by the recorder's [`Capture`](capture::Capture) and
//! streamed through a [`TraceEncoder`](encoder::TraceEncoder).
//!
//! [`decoder::read`] reconstructs a [`TraceFile`](decoder::TraceFile) from such a
//! stream, reporting malformed data as issues rather than failing.
//!
//! # File layout
//!
//! * 128 byte banner
//! * Manifest section: format version, program name, description, creation time,
//!   followed by a dictionary sub-chunk with the two strings
//! * A chain of work-item sections, each holding
//!   - a header with the item count and, per field, a base value and a byte width
//!   - the packed records
//!   - a dictionary sub-chunk with the strings first used in this section
//!
//! Every section header starts with the offset of its dictionary and the offset of the
//! next section; the last section points at `u64::MAX`.
//!
//! # Field packing
//!
//! Within a section each field is stored as `value - base` in the smallest number of
//! whole bytes that fits the section's range. A field that is constant across the
//! section takes no bytes at all. String indices use a variant where a stored zero
//! means the empty string (index 0) and non-zero values are offset from the smallest
//! non-zero index, so sparse use of the empty string doesn't widen the field.
//!
//! | Field      | Packing |
//! |------------|---------|
//! | start time | absolute |
//! | duration   | absolute |
//! | category   | zero sentinel |
//! | worker     | zero sentinel |
//! | routine    | zero sentinel |
//! | comment    | zero sentinel |
//! | task id    | absolute |
#![deny(clippy::all)]

pub mod capture;
pub mod config;
pub mod decoder;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod format;
pub mod item;
pub mod opts;
pub mod packing;
pub mod prelude;
pub mod recorder;
pub mod tracing;
pub mod types;
