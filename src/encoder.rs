use crate::dictionary::{check_len, Interner};
use crate::error::{Error, Result};
use crate::format::{
    banner, write_dictionary_chunk, Field, ManifestSection, SectionHeader, WorkItemSectionHeader,
    END_OF_CHAIN, FIELD_COUNT, FORMAT_VERSION,
};
use crate::item::WorkItem;
use crate::packing::BitFieldPacker;
use crate::types::SectionThreshold;
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

type PackedRecord = [u64; FIELD_COUNT];

/// Incremental trace file writer.
///
/// The banner and manifest are written on construction. Work items are buffered per
/// section and a section is emitted once its buffer is full and another item
/// arrives, or on [`finish`](TraceEncoder::finish). Section headers are written as
/// placeholders and patched in place when the section is closed, so the writer must
/// be seekable.
///
/// All offsets in the file are relative to the stream position at construction.
pub struct TraceEncoder<W: Write + Seek> {
    out: W,
    origin: u64,
    interner: Interner,
    threshold: usize,
    buffer: Vec<PackedRecord>,
    section_start: u64,
    sections_written: usize,
    items_written: u64,
}

impl<W: Write + Seek> TraceEncoder<W> {
    pub fn new(out: W, program_name: &str, description: &str) -> Result<Self> {
        Self::with_threshold(out, program_name, description, SectionThreshold::default())
    }

    pub fn with_threshold(
        mut out: W,
        program_name: &str,
        description: &str,
        threshold: SectionThreshold,
    ) -> Result<Self> {
        let origin = out.stream_position()?;
        let mut enc = Self {
            out,
            origin,
            interner: Interner::new(),
            threshold: threshold.items(),
            buffer: Vec::new(),
            section_start: 0,
            sections_written: 0,
            items_written: 0,
        };
        enc.write_manifest(program_name, description)?;
        enc.open_section()?;
        Ok(enc)
    }

    pub fn write_work_item(&mut self, item: &WorkItem) -> Result<()> {
        if item.stop_ns < item.start_ns {
            return Err(Error::StopBeforeStart {
                start_ns: item.start_ns,
                stop_ns: item.stop_ns,
            });
        }

        // All or nothing, so a rejected item leaves no strings behind
        for text in [&item.category, &item.worker, &item.routine, &item.comment] {
            check_len(text)?;
        }

        if self.buffer.len() >= self.threshold {
            self.close_section(false)?;
            self.open_section()?;
        }

        // Same order as Field::ALL
        let record = [
            item.start_ns,
            item.stop_ns - item.start_ns,
            u64::from(self.interner.intern(&item.category)?),
            u64::from(self.interner.intern(&item.worker)?),
            u64::from(self.interner.intern(&item.routine)?),
            u64::from(self.interner.intern(&item.comment)?),
            u64::from(item.task_id),
        ];
        self.buffer.push(record);
        Ok(())
    }

    /// Close the open section, flush, and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        self.close_section(true)?;
        self.out.flush()?;
        debug_assert_eq!(self.interner.pending_len(), 0);
        debug_assert!(self.buffer.is_empty());
        debug!(
            sections = self.sections_written,
            items = self.items_written,
            strings = self.interner.persisted_len(),
            "Finished trace"
        );
        Ok(self.out)
    }

    /// Sections closed so far, not counting the manifest.
    pub fn sections_written(&self) -> usize {
        self.sections_written
    }

    pub fn items_written(&self) -> u64 {
        self.items_written
    }

    fn write_manifest(&mut self, program_name: &str, description: &str) -> Result<()> {
        self.out.write_all(&banner())?;

        let manifest_start = self.offset()?;
        let mut manifest = ManifestSection {
            header: SectionHeader::default(),
            format_version: FORMAT_VERSION,
            program_name_idx: self.interner.intern(program_name)?,
            description_idx: self.interner.intern(description)?,
            created_at_ns: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
        };
        manifest.write_to(&mut self.out)?;

        manifest.header.dictionary_offset = self.offset()?;
        write_dictionary_chunk(&mut self.out, &self.interner.take_pending())?;
        let end = self.offset()?;
        manifest.header.next_section_offset = end;

        self.seek_to(manifest_start)?;
        manifest.write_to(&mut self.out)?;
        self.seek_to(end)?;
        Ok(())
    }

    fn open_section(&mut self) -> Result<()> {
        self.section_start = self.offset()?;
        WorkItemSectionHeader::default().write_to(&mut self.out)?;
        Ok(())
    }

    fn close_section(&mut self, last: bool) -> Result<()> {
        let mut header = WorkItemSectionHeader {
            item_count: self.buffer.len() as u32,
            ..Default::default()
        };

        let packers = Field::ALL.map(|field| {
            BitFieldPacker::plan(field.mode(), self.buffer.iter().map(|r| r[field as usize]))
        });
        for (slot, packer) in header.fields.iter_mut().zip(packers.iter()) {
            *slot = packer.packing();
        }

        let mut records = Vec::with_capacity(self.buffer.len() * header.record_size() as usize);
        for record in self.buffer.iter() {
            for (value, packer) in record.iter().zip(packers.iter()) {
                packer.pack_into(*value, &mut records);
            }
        }
        self.out.write_all(&records)?;

        header.header.dictionary_offset = self.offset()?;
        let strings = self.interner.take_pending();
        write_dictionary_chunk(&mut self.out, &strings)?;
        let end = self.offset()?;
        header.header.next_section_offset = if last { END_OF_CHAIN } else { end };

        self.seek_to(self.section_start)?;
        header.write_to(&mut self.out)?;
        self.seek_to(end)?;

        debug!(
            section = self.sections_written,
            items = header.item_count,
            record_size = header.record_size(),
            new_strings = strings.len(),
            "Closed work item section"
        );

        self.sections_written += 1;
        self.items_written += u64::from(header.item_count);
        self.buffer.clear();
        Ok(())
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.out.stream_position()? - self.origin)
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.out.seek(SeekFrom::Start(self.origin + offset))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{
        SectionHeader, BANNER_SIZE, MANIFEST_SECTION_SIZE, WORK_ITEM_SECTION_HEADER_SIZE,
    };
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

    fn section_at(bytes: &[u8], offset: u64) -> WorkItemSectionHeader {
        WorkItemSectionHeader::read_from(&mut Cursor::new(&bytes[offset as usize..])).unwrap()
    }

    #[test]
    fn manifest_only_file() {
        let enc = TraceEncoder::new(Cursor::new(Vec::new()), "prog", "desc").unwrap();
        assert_eq!(enc.sections_written(), 0);
        let bytes = enc.finish().unwrap().into_inner();

        let manifest =
            ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        assert_eq!(manifest.format_version, FORMAT_VERSION);
        assert_eq!(manifest.program_name_idx, 1);
        assert_eq!(manifest.description_idx, 2);
        assert_eq!(
            manifest.header.dictionary_offset,
            BANNER_SIZE as u64 + MANIFEST_SECTION_SIZE
        );
        // count + "prog" + "desc"
        let first_section = manifest.header.dictionary_offset + 4 + 5 + 5;
        assert_eq!(manifest.header.next_section_offset, first_section);

        let section = section_at(&bytes, first_section);
        assert_eq!(section.item_count, 0);
        assert!(section.header.is_last());
        assert_eq!(
            bytes.len() as u64,
            first_section + WORK_ITEM_SECTION_HEADER_SIZE + 4
        );
    }

    #[test]
    fn threshold_splits_lazily() {
        let mut enc = TraceEncoder::with_threshold(
            Cursor::new(Vec::new()),
            "",
            "",
            SectionThreshold(1),
        )
        .unwrap();
        enc.write_work_item(&item(0, 100, "A", "f", 1)).unwrap();
        assert_eq!(enc.sections_written(), 0);
        enc.write_work_item(&item(50, 80, "A", "g", 1)).unwrap();
        assert_eq!(enc.sections_written(), 1);
        let bytes = enc.finish().unwrap().into_inner();

        let manifest =
            ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        let first = section_at(&bytes, manifest.header.next_section_offset);
        assert_eq!(first.item_count, 1);
        assert!(!first.header.is_last());
        let second = section_at(&bytes, first.header.next_section_offset);
        assert_eq!(second.item_count, 1);
        assert!(second.header.is_last());
    }

    #[test]
    fn constant_fields_are_implied() {
        let mut enc = TraceEncoder::new(Cursor::new(Vec::new()), "", "").unwrap();
        enc.write_work_item(&item(10, 20, "A", "f", 7)).unwrap();
        enc.write_work_item(&item(30, 40, "A", "f", 7)).unwrap();
        let bytes = enc.finish().unwrap().into_inner();

        let manifest =
            ManifestSection::read_from(&mut Cursor::new(&bytes[BANNER_SIZE..])).unwrap();
        let section = section_at(&bytes, manifest.header.next_section_offset);
        assert_eq!(section.item_count, 2);
        assert_eq!(section.field(Field::StartTime).width, 1);
        assert_eq!(section.field(Field::StartTime).base, 10);
        // Both durations are 10
        assert_eq!(section.field(Field::Duration).width, 0);
        assert_eq!(section.field(Field::Duration).base, 10);
        assert_eq!(section.field(Field::Worker).width, 0);
        assert_eq!(section.field(Field::Worker).base, 1);
        assert_eq!(section.field(Field::Category).base, 0);
        assert_eq!(section.field(Field::TaskId).base, 7);
        assert_eq!(section.record_size(), 1);
        assert_eq!(
            section.header.dictionary_offset,
            manifest.header.next_section_offset + WORK_ITEM_SECTION_HEADER_SIZE + 2
        );
    }

    #[test]
    fn rejects_inverted_span() {
        let mut enc = TraceEncoder::new(Cursor::new(Vec::new()), "", "").unwrap();
        let err = enc.write_work_item(&item(10, 5, "A", "f", 0)).unwrap_err();
        assert!(matches!(
            err,
            Error::StopBeforeStart {
                start_ns: 10,
                stop_ns: 5
            }
        ));
    }

    #[test]
    fn rejects_long_strings_at_call_site() {
        let mut enc = TraceEncoder::new(Cursor::new(Vec::new()), "", "").unwrap();
        let long = "w".repeat(300);
        let err = enc.write_work_item(&item(0, 1, &long, "f", 0)).unwrap_err();
        assert!(matches!(err, Error::StringTooLong { len: 300, .. }));
        assert!(matches!(
            TraceEncoder::new(Cursor::new(Vec::new()), &long, ""),
            Err(Error::StringTooLong { .. })
        ));
    }

    #[test]
    fn rejected_item_interns_nothing() {
        let mut enc = TraceEncoder::new(Cursor::new(Vec::new()), "", "").unwrap();
        let bad = WorkItem {
            comment: "c".repeat(256),
            ..item(0, 1, "FreshWorker", "fresh_routine", 0)
        };
        assert!(matches!(
            enc.write_work_item(&bad),
            Err(Error::StringTooLong { len: 256, .. })
        ));
        assert_eq!(enc.interner.pending_len(), 0);

        enc.write_work_item(&item(0, 1, "A", "f", 0)).unwrap();
        let bytes = enc.finish().unwrap().into_inner();
        assert!(!bytes.windows(11).any(|w| w == b"FreshWorker"));
        let tf = crate::decoder::read(Cursor::new(bytes)).unwrap();
        // "" + "A" + "f"
        assert_eq!(tf.dictionary.len(), 3);
        assert_eq!(tf.work_items[0].worker_idx, 1);
    }

    #[test]
    fn offsets_are_relative_to_origin() {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_all(b"prefix").unwrap();
        let enc = TraceEncoder::new(cursor, "p", "").unwrap();
        let bytes = enc.finish().unwrap().into_inner();
        let manifest =
            ManifestSection::read_from(&mut Cursor::new(&bytes[6 + BANNER_SIZE..])).unwrap();
        assert_eq!(
            manifest.header,
            SectionHeader {
                dictionary_offset: BANNER_SIZE as u64 + MANIFEST_SECTION_SIZE,
                next_section_offset: BANNER_SIZE as u64 + MANIFEST_SECTION_SIZE + 4 + 2,
            }
        );
    }
}
