use crate::format::MAX_SECTION_ITEMS;
use derive_more::{Display, From, Into};
use serde::Deserialize;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;

#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct Interruptor(Arc<AtomicBool>);

impl Interruptor {
    pub fn new() -> Self {
        Interruptor(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }
}

impl Default for Interruptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of event slots pre-allocated by a recorder session.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, From, Into, Display,
)]
#[repr(transparent)]
pub struct Capacity(pub u32);

impl Default for Capacity {
    fn default() -> Self {
        Capacity(256 * 1024)
    }
}

impl FromStr for Capacity {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Capacity(s.trim().parse::<u32>()?))
    }
}

/// Number of work items buffered before a section is written out.
///
/// Clamped to `1..=MAX_SECTION_ITEMS`.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, From, Into, Display,
)]
#[repr(transparent)]
pub struct SectionThreshold(pub u32);

impl SectionThreshold {
    pub fn items(self) -> usize {
        self.0.clamp(1, MAX_SECTION_ITEMS) as usize
    }
}

impl Default for SectionThreshold {
    fn default() -> Self {
        SectionThreshold(8192)
    }
}

impl FromStr for SectionThreshold {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SectionThreshold(s.trim().parse::<u32>()?))
    }
}
