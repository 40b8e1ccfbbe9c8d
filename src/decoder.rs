use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::format::{
    banner, read_dictionary_chunk, Field, ManifestSection, WorkItemSectionHeader, BANNER_SIZE,
    END_OF_CHAIN, FIELD_COUNT, FORMAT_VERSION, MAX_SECTION_ITEMS, WORK_ITEM_SECTION_HEADER_SIZE,
};
use crate::item::{PackedWorkItem, WorkItem};
use crate::packing::{BitFieldUnpacker, MAX_FIELD_WIDTH};
use derive_more::Display;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub enum IssueCode {
    #[display(fmt = "bad-magic")]
    BadMagic,
    #[display(fmt = "unsupported-version")]
    UnsupportedVersion,
    #[display(fmt = "truncated-section")]
    TruncatedSection,
    #[display(fmt = "truncated-dictionary")]
    TruncatedDictionary,
    #[display(fmt = "item-count-mismatch")]
    ItemCountMismatch,
    #[display(fmt = "invalid-field-width")]
    InvalidFieldWidth,
    #[display(fmt = "invalid-section-offset")]
    InvalidSectionOffset,
}

/// A problem found while decoding. Offsets are relative to the start of the file.
#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display(fmt = "[{code}] at offset {offset}: {message}")]
pub struct Issue {
    pub code: IssueCode,
    pub offset: u64,
    pub message: String,
}

/// Everything decoded from one trace file.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct TraceFile {
    pub format_version: u32,
    pub program_name_idx: u32,
    pub description_idx: u32,
    pub created_at_ns: u64,
    pub dictionary: Dictionary,
    pub work_items: Vec<PackedWorkItem>,
    /// Work-item sections that contributed items.
    pub sections: usize,
    pub issues: Vec<Issue>,
}

impl TraceFile {
    pub fn string(&self, idx: u32) -> Option<&str> {
        self.dictionary.get(idx)
    }

    pub fn program_name(&self) -> Option<&str> {
        self.string(self.program_name_idx)
    }

    pub fn description(&self) -> Option<&str> {
        self.string(self.description_idx)
    }

    /// Resolve the dictionary indices of `item`, `None` if any index is unknown.
    pub fn resolve(&self, item: &PackedWorkItem) -> Option<WorkItem> {
        Some(WorkItem {
            start_ns: item.start_ns,
            stop_ns: item.stop_ns,
            category: self.string(item.category_idx)?.to_owned(),
            worker: self.string(item.worker_idx)?.to_owned(),
            routine: self.string(item.routine_idx)?.to_owned(),
            comment: self.string(item.comment_idx)?.to_owned(),
            task_id: item.task_id,
        })
    }

    /// Work items in file order, each resolved with [`resolve`](TraceFile::resolve).
    pub fn work_items_resolved(&self) -> impl Iterator<Item = Option<WorkItem>> + '_ {
        self.work_items.iter().map(|i| self.resolve(i))
    }

    /// Earliest start and latest stop over all work items.
    pub fn time_span(&self) -> Option<(u64, u64)> {
        let start = self.work_items.iter().map(|i| i.start_ns).min()?;
        let stop = self.work_items.iter().map(|i| i.stop_ns).max()?;
        Some((start, stop))
    }

    /// True when the file decoded without any issue.
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Decode a trace file from a stream positioned at its first byte.
///
/// Malformed data never fails the call: it is reported in [`TraceFile::issues`] and
/// everything decoded up to that point is returned. Only I/O errors other than an
/// unexpected end of stream are propagated.
pub fn read<R: Read + Seek>(mut reader: R) -> Result<TraceFile> {
    let origin = reader.stream_position()?;
    let len = reader.seek(SeekFrom::End(0))? - origin;
    reader.seek(SeekFrom::Start(origin))?;

    let mut d = Decoder {
        reader,
        origin,
        len,
        file: TraceFile::default(),
    };
    d.decode()?;
    debug!(
        items = d.file.work_items.len(),
        sections = d.file.sections,
        strings = d.file.dictionary.len(),
        issues = d.file.issues.len(),
        "Decoded trace"
    );
    Ok(d.file)
}

/// Open and decode the trace file at `path`.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<TraceFile> {
    let f = File::open(path)?;
    read(BufReader::new(f))
}

struct Decoder<R> {
    reader: R,
    origin: u64,
    len: u64,
    file: TraceFile,
}

impl<R: Read + Seek> Decoder<R> {
    fn decode(&mut self) -> Result<()> {
        let mut magic = [0u8; BANNER_SIZE];
        let banner_read = self.reader.read_exact(&mut magic);
        if self.recover(banner_read, IssueCode::BadMagic, 0)?.is_none() {
            return Ok(());
        }
        if magic != banner() {
            self.issue(IssueCode::BadMagic, 0, "banner does not match".to_owned());
            return Ok(());
        }

        let manifest_offset = BANNER_SIZE as u64;
        let manifest = ManifestSection::read_from(&mut self.reader);
        let manifest = match self.recover(manifest, IssueCode::TruncatedSection, manifest_offset)? {
            Some(m) => m,
            None => return Ok(()),
        };
        if manifest.format_version != FORMAT_VERSION {
            self.issue(
                IssueCode::UnsupportedVersion,
                manifest_offset,
                format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    manifest.format_version
                ),
            );
        }
        self.file.format_version = manifest.format_version;
        self.file.program_name_idx = manifest.program_name_idx;
        self.file.description_idx = manifest.description_idx;
        self.file.created_at_ns = manifest.created_at_ns;

        if !self.read_dictionary(manifest.header.dictionary_offset)? {
            return Ok(());
        }

        let mut prev = manifest_offset;
        let mut next = manifest.header.next_section_offset;
        while next != END_OF_CHAIN {
            if next <= prev || next > self.len {
                self.issue(
                    IssueCode::InvalidSectionOffset,
                    prev,
                    format!("next section offset {next} is out of order or past the end"),
                );
                break;
            }

            self.seek(next)?;
            let header = WorkItemSectionHeader::read_from(&mut self.reader);
            let header = match self.recover(header, IssueCode::TruncatedSection, next)? {
                Some(h) => h,
                None => break,
            };
            if header.item_count == 0 {
                break;
            }

            let intact = self.read_items(next, &header)?;
            if !self.read_dictionary(header.header.dictionary_offset)? || !intact {
                break;
            }

            prev = next;
            next = header.header.next_section_offset;
        }
        Ok(())
    }

    /// Returns false when the section was only partially decoded.
    fn read_items(&mut self, section_offset: u64, header: &WorkItemSectionHeader) -> Result<bool> {
        if let Some(f) = Field::ALL
            .iter()
            .find(|f| header.field(**f).width > MAX_FIELD_WIDTH)
        {
            self.issue(
                IssueCode::InvalidFieldWidth,
                section_offset,
                format!("{f:?} width {} exceeds 8 bytes", header.field(*f).width),
            );
            return Ok(false);
        }

        let records_start = section_offset + WORK_ITEM_SECTION_HEADER_SIZE;
        let record_size = header.record_size();
        let declared = u64::from(header.item_count);
        let dictionary_offset = header.header.dictionary_offset;
        let expected_end = records_start + declared * record_size;

        // Zero-width records take no bytes, so only the cap bounds them
        let mut count = declared.min(u64::from(MAX_SECTION_ITEMS));
        if record_size > 0 {
            let available = dictionary_offset
                .min(self.len)
                .saturating_sub(records_start);
            count = count.min(available / record_size);
        }
        let intact = count == declared && dictionary_offset == expected_end;
        if !intact {
            self.issue(
                IssueCode::ItemCountMismatch,
                section_offset,
                format!(
                    "section declares {declared} items ending at {expected_end} with its \
                     dictionary at {dictionary_offset}, decoding {count}"
                ),
            );
        }

        let mut records = vec![0u8; (count * record_size) as usize];
        let read = self.reader.read_exact(&mut records);
        if self
            .recover(read, IssueCode::TruncatedSection, records_start)?
            .is_none()
        {
            return Ok(false);
        }

        let unpackers: [BitFieldUnpacker; FIELD_COUNT] =
            Field::ALL.map(|f| BitFieldUnpacker::new(f.mode(), header.field(f)));
        let mut pos = 0usize;
        self.file.work_items.reserve(count as usize);
        for _ in 0..count {
            let mut values = [0u64; FIELD_COUNT];
            for (value, unpacker) in values.iter_mut().zip(unpackers.iter()) {
                *value = unpacker.unpack(&records[pos..]);
                pos += unpacker.width();
            }
            self.file.work_items.push(PackedWorkItem {
                start_ns: values[Field::StartTime as usize],
                stop_ns: values[Field::StartTime as usize]
                    .saturating_add(values[Field::Duration as usize]),
                category_idx: values[Field::Category as usize] as u32,
                worker_idx: values[Field::Worker as usize] as u32,
                routine_idx: values[Field::Routine as usize] as u32,
                comment_idx: values[Field::Comment as usize] as u32,
                task_id: values[Field::TaskId as usize] as u32,
            });
        }
        self.file.sections += 1;
        Ok(intact)
    }

    /// Returns false when the dictionary could not be read completely.
    fn read_dictionary(&mut self, offset: u64) -> Result<bool> {
        if offset > self.len {
            self.issue(
                IssueCode::InvalidSectionOffset,
                offset,
                "dictionary offset is past the end of the stream".to_owned(),
            );
            return Ok(false);
        }
        self.seek(offset)?;
        let res = read_dictionary_chunk(&mut self.reader, &mut self.file.dictionary);
        Ok(self
            .recover(res, IssueCode::TruncatedDictionary, offset)?
            .is_some())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.origin + offset))?;
        Ok(())
    }

    /// Turn an unexpected end of stream into an issue, propagate any other error.
    fn recover<T>(&mut self, res: io::Result<T>, code: IssueCode, offset: u64) -> Result<Option<T>> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.issue(code, offset, "unexpected end of stream".to_owned());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn issue(&mut self, code: IssueCode, offset: u64, message: String) {
        let issue = Issue {
            code,
            offset,
            message,
        };
        warn!("Trace decode issue {issue}");
        self.file.issues.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::TraceEncoder;
    use crate::types::SectionThreshold;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn item(start_ns: u64, stop_ns: u64, worker: &str, routine: &str, task_id: u32) -> WorkItem {
        WorkItem {
            start_ns,
            stop_ns,
            worker: worker.to_owned(),
            routine: routine.to_owned(),
            task_id,
            ..Default::default()
        }
    }

    fn encode(items: &[WorkItem], threshold: u32) -> Vec<u8> {
        let mut enc = TraceEncoder::with_threshold(
            Cursor::new(Vec::new()),
            "prog",
            "desc",
            SectionThreshold(threshold),
        )
        .unwrap();
        for i in items {
            enc.write_work_item(i).unwrap();
        }
        enc.finish().unwrap().into_inner()
    }

    fn sample() -> Vec<WorkItem> {
        vec![
            item(0, 100, "A", "f", 1),
            item(50, 80, "A", "g", 1),
            item(60, 60, "B", "", 0),
            WorkItem {
                category: "io".to_owned(),
                comment: "slow path".to_owned(),
                ..item(1_000_000, 9_000_000, "B", "h", 42)
            },
        ]
    }

    #[test]
    fn two_item_scenario() {
        let items = vec![item(0, 100, "A", "f", 1), item(50, 80, "A", "g", 1)];
        let tf = read(Cursor::new(encode(&items, 1))).unwrap();
        assert!(tf.is_complete());
        assert_eq!(tf.sections, 2);
        assert_eq!(tf.work_items_resolved().collect::<Option<Vec<_>>>().unwrap(), items);
        assert_eq!(tf.program_name(), Some("prog"));
        assert_eq!(tf.description(), Some("desc"));
        assert_eq!(tf.format_version, FORMAT_VERSION);
        assert_eq!(tf.time_span(), Some((0, 100)));
    }

    #[test]
    fn dictionary_order_and_reuse() {
        let tf = read(Cursor::new(encode(&sample(), 2))).unwrap();
        assert_eq!(
            tf.dictionary.as_slice(),
            &["", "prog", "desc", "A", "f", "g", "B", "io", "h", "slow path"]
                .map(str::to_owned)
        );
        assert_eq!(tf.work_items[0].worker_idx, 3);
        assert_eq!(tf.work_items[3].worker_idx, tf.work_items[2].worker_idx);
        assert_eq!(tf.work_items[2].routine_idx, 0);
    }

    #[test]
    fn empty_trace() {
        let tf = read(Cursor::new(encode(&[], 4))).unwrap();
        assert!(tf.is_complete());
        assert!(tf.work_items.is_empty());
        assert_eq!(tf.sections, 0);
        assert_eq!(tf.time_span(), None);
    }

    #[test]
    fn bad_magic_is_an_issue() {
        let mut bytes = encode(&sample(), 8);
        bytes[0] = b'X';
        let tf = read(Cursor::new(bytes)).unwrap();
        assert_eq!(tf.issues.len(), 1);
        assert_eq!(tf.issues[0].code, IssueCode::BadMagic);
        assert!(tf.work_items.is_empty());
    }

    #[test]
    fn short_stream_is_an_issue() {
        let tf = read(Cursor::new(b"PROFANE".to_vec())).unwrap();
        assert_eq!(tf.issues[0].code, IssueCode::BadMagic);
    }

    #[test]
    fn truncation_keeps_earlier_sections() {
        let items = sample();
        let bytes = encode(&items, 2);
        let full = read(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(full.sections, 2);

        // Cut into the second section's dictionary
        let truncated = bytes[..bytes.len() - 3].to_vec();
        let tf = read(Cursor::new(truncated)).unwrap();
        assert_eq!(tf.issues.len(), 1);
        assert_eq!(tf.issues[0].code, IssueCode::TruncatedDictionary);
        assert_eq!(tf.work_items, full.work_items);
        assert_eq!(tf.resolve(&tf.work_items[0]).unwrap(), items[0]);
    }

    #[test]
    fn truncated_records_decode_what_fits() {
        let items: Vec<WorkItem> = (0..10).map(|i| item(i * 1000, i * 1000 + 7, "A", "f", 0)).collect();
        let bytes = encode(&items, 100);
        let full = read(Cursor::new(bytes.clone())).unwrap();
        let first = full.work_items.len();
        assert_eq!(first, 10);

        // Chop the dictionary and the last records: start needs 2 bytes per record
        let dict_len = 4 + 2 + 2;
        let truncated = bytes[..bytes.len() - dict_len - 5].to_vec();
        let tf = read(Cursor::new(truncated)).unwrap();
        assert_eq!(tf.issues[0].code, IssueCode::ItemCountMismatch);
        assert_eq!(tf.work_items.len(), 7);
        assert_eq!(&tf.work_items[..], &full.work_items[..7]);
    }

    #[test]
    fn corrupt_width_is_an_issue() {
        let bytes = encode(&sample(), 8);
        let full = read(Cursor::new(bytes.clone())).unwrap();
        let manifest = ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        let widths_at = (manifest.header.next_section_offset + WORK_ITEM_SECTION_HEADER_SIZE - 4) as usize;
        let mut corrupt = bytes;
        corrupt[widths_at] = 0x0F;
        let tf = read(Cursor::new(corrupt)).unwrap();
        assert_eq!(tf.issues[0].code, IssueCode::InvalidFieldWidth);
        assert!(tf.work_items.is_empty());
        assert_eq!(tf.sections, 0);
        // The section's strings are still readable
        assert_eq!(tf.dictionary, full.dictionary);
    }

    #[test]
    fn backwards_offset_is_an_issue() {
        let bytes = encode(&sample(), 8);
        let manifest = ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        let mut corrupt = bytes;
        // Point the manifest's next offset back at the banner
        corrupt[BANNER_SIZE + 8..BANNER_SIZE + 16].copy_from_slice(&16u64.to_le_bytes());
        let tf = read(Cursor::new(corrupt)).unwrap();
        assert_eq!(tf.issues[0].code, IssueCode::InvalidSectionOffset);
        assert!(manifest.header.next_section_offset > BANNER_SIZE as u64);
        assert_eq!(tf.program_name(), Some("prog"));
    }

    fn first_section_offset(bytes: &[u8]) -> usize {
        let manifest = ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        manifest.header.next_section_offset as usize
    }

    #[test]
    fn implied_records_are_capped() {
        // Identical items leave every field implied, so records take no bytes
        let items = vec![item(5, 9, "A", "f", 1), item(5, 9, "A", "f", 1)];
        let mut bytes = encode(&items, 8);
        let count_at = first_section_offset(&bytes) + 16;
        bytes[count_at..count_at + 4].copy_from_slice(&0x4000_0000u32.to_le_bytes());

        let tf = read(Cursor::new(bytes)).unwrap();
        assert_eq!(tf.issues.len(), 1);
        assert_eq!(tf.issues[0].code, IssueCode::ItemCountMismatch);
        assert_eq!(tf.work_items.len(), MAX_SECTION_ITEMS as usize);
        assert_eq!(tf.resolve(&tf.work_items[0]).unwrap(), items[0]);
    }

    #[test]
    fn dictionary_past_records_is_a_count_mismatch() {
        let mut bytes = encode(&sample(), 8);
        let section = first_section_offset(&bytes);
        let dict = u64::from_le_bytes(bytes[section..section + 8].try_into().unwrap());
        bytes[section..section + 8].copy_from_slice(&(dict + 2).to_le_bytes());

        let tf = read(Cursor::new(bytes)).unwrap();
        assert_eq!(tf.issues[0].code, IssueCode::ItemCountMismatch);
        assert_eq!(tf.work_items.len(), 4);
    }

    #[test]
    fn unsupported_version_still_decodes() {
        let mut bytes = encode(&sample(), 8);
        bytes[BANNER_SIZE + 16..BANNER_SIZE + 20].copy_from_slice(&9u32.to_le_bytes());
        let tf = read(Cursor::new(bytes)).unwrap();
        assert_eq!(tf.issues.len(), 1);
        assert_eq!(tf.issues[0].code, IssueCode::UnsupportedVersion);
        assert_eq!(tf.work_items_resolved().collect::<Option<Vec<_>>>().unwrap(), sample());
    }
}
