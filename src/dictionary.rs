//! String interning for trace files.
//!
//! Index 0 always stands for the empty string and is never physically stored.
//! Every other string gets the next free index the first time it is seen and keeps
//! it for the rest of the encode session, across section boundaries.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Index reserved for the empty string.
pub const EMPTY_STRING_INDEX: u32 = 0;

/// Longest string a dictionary sub-chunk can hold (one byte length prefix).
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Encode-side interner.
///
/// Strings already written to an earlier section live in the persisted set; strings
/// first seen in the current section wait in the pending set until the section is
/// closed and [`take_pending`](Interner::take_pending) promotes them.
#[derive(Debug)]
pub struct Interner {
    persisted: HashMap<String, u32>,
    pending: Vec<String>,
    pending_index: HashMap<String, u32>,
    next_index: u32,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    pub fn new() -> Self {
        Self {
            persisted: Default::default(),
            pending: Default::default(),
            pending_index: Default::default(),
            next_index: EMPTY_STRING_INDEX + 1,
        }
    }

    /// Index of `text`, assigning a fresh one if it was never seen.
    pub fn intern(&mut self, text: &str) -> Result<u32> {
        if text.is_empty() {
            return Ok(EMPTY_STRING_INDEX);
        }
        check_len(text)?;

        let idx = if let Some(idx) = self.persisted.get(text) {
            *idx
        } else if let Some(idx) = self.pending_index.get(text) {
            *idx
        } else {
            let idx = self.next_index;
            self.next_index += 1;
            self.pending.push(text.to_owned());
            self.pending_index.insert(text.to_owned(), idx);
            idx
        };
        Ok(idx)
    }

    /// Drain the strings first seen since the last call, in index order, and mark
    /// them as persisted.
    pub fn take_pending(&mut self) -> Vec<String> {
        self.pending_index.clear();
        let pending = std::mem::take(&mut self.pending);
        let first = self.next_index - pending.len() as u32;
        for (offset, text) in pending.iter().enumerate() {
            self.persisted.insert(text.clone(), first + offset as u32);
        }
        pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }
}

/// Reject strings a dictionary sub-chunk can't hold.
pub fn check_len(text: &str) -> Result<()> {
    if text.len() > MAX_STRING_LEN {
        Err(Error::StringTooLong {
            len: text.len(),
            prefix: text.chars().take(16).collect(),
        })
    } else {
        Ok(())
    }
}

/// Decode-side dictionary: the ordered list of every string in a file.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Dictionary {
    strings: Vec<String>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            strings: vec![String::new()],
        }
    }

    pub fn push(&mut self, text: String) {
        self.strings.push(text);
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    /// Number of entries, including the reserved empty string.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing beyond the reserved empty string is present.
    pub fn is_empty(&self) -> bool {
        self.strings.len() == 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.strings
    }
}
