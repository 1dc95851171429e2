// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Enum table: interned names for filters, memos, input-file text blobs,
//! output files and inline indexed-text lists.
//!
//! The table is a dense array. The first 32 entries are reserved for the 32
//! filter slots; all other kinds are appended from index 32 upward. An entry
//! once assigned never relocates, so its index can be stored in value slots.
//! Index 0 doubles as the "none" sentinel for non-filter references.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::error::ParseErrorCode;

/// Number of reserved filter slots at the start of the table.
pub const FILTER_SLOTS: usize = 32;

/// Maximum number of entries the table accepts.
pub const MAX_ENUMS: usize = 2000;

/// Index into the enum table. 0 means "none" where a non-filter entry is
/// expected, since filters never appear in those positions.
pub type EnumIndex = u16;

/// Kind discriminant used for lookups and type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    Filter,
    Memo,
    InFile,
    OutFile,
    InlineText,
}

/// Payload of one enum table entry.
#[derive(Debug)]
pub enum EnumPayload {
    /// FILTER() slot with its optional description
    Filter { description: Option<String> },
    /// MEMO() scalar storage cell
    Memo { value: f64 },
    /// IN_FILE() indexed-text blob loaded from a file
    InFile { text: IndexedText, path: PathBuf },
    /// OUT_FILE() handle; the writer is absent in check-only mode
    OutFile {
        writer: Option<BufWriter<File>>,
        path: PathBuf,
    },
    /// Inline `{a|b|c}` indexed-text list
    InlineText { text: IndexedText },
}

impl EnumPayload {
    pub fn kind(&self) -> EnumKind {
        match self {
            EnumPayload::Filter { .. } => EnumKind::Filter,
            EnumPayload::Memo { .. } => EnumKind::Memo,
            EnumPayload::InFile { .. } => EnumKind::InFile,
            EnumPayload::OutFile { .. } => EnumKind::OutFile,
            EnumPayload::InlineText { .. } => EnumKind::InlineText,
        }
    }
}

/// One named entry of the enum table.
#[derive(Debug)]
pub struct EnumEntry {
    pub name: String,
    pub payload: EnumPayload,
}

/// Dense table of enum entries. See the module documentation for layout.
#[derive(Debug, Default)]
pub struct EnumTable {
    entries: Vec<Option<EnumEntry>>,
    filters: usize,
}

impl EnumTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(FILTER_SLOTS + 64);
        entries.resize_with(FILTER_SLOTS, || None);
        EnumTable {
            entries,
            filters: 0,
        }
    }

    /// Number of defined filter slots.
    pub fn filter_count(&self) -> usize {
        self.filters
    }

    /// Total number of occupied and reserved entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters == 0 && self.entries.len() == FILTER_SLOTS
    }

    /// Register a filter into the next free filter slot.
    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<EnumIndex, ParseErrorCode> {
        if self.filters >= FILTER_SLOTS {
            return Err(ParseErrorCode::FilterMaxCount);
        }

        let idx = self.filters;
        self.entries[idx] = Some(EnumEntry {
            name: name.into(),
            payload: EnumPayload::Filter { description },
        });
        self.filters += 1;
        Ok(idx as EnumIndex)
    }

    /// Append a non-filter entry and return its index.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        payload: EnumPayload,
    ) -> Result<EnumIndex, ParseErrorCode> {
        if self.entries.len() >= MAX_ENUMS {
            return Err(ParseErrorCode::MaxEnums);
        }

        let idx = self.entries.len();
        self.entries.push(Some(EnumEntry {
            name: name.into(),
            payload,
        }));
        Ok(idx as EnumIndex)
    }

    /// Check whether any entry already uses the given name.
    pub fn name_exists(&self, name: &str) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|entry| entry.name == name)
    }

    /// Find a non-filter entry by name and kind. Returns 0 when not found.
    pub fn find(&self, name: &str, kind: EnumKind) -> EnumIndex {
        for (idx, entry) in self.entries.iter().enumerate().skip(FILTER_SLOTS) {
            if let Some(entry) = entry {
                if entry.payload.kind() == kind && entry.name == name {
                    return idx as EnumIndex;
                }
            }
        }
        0
    }

    /// Name of the IN_FILE/OUT_FILE entry already using the given path.
    pub fn path_in_use(&self, path: &Path, kind: EnumKind) -> Option<&str> {
        self.entries.iter().flatten().find_map(|entry| {
            let used = match &entry.payload {
                EnumPayload::InFile { path: p, .. } => kind == EnumKind::InFile && p == path,
                EnumPayload::OutFile { path: p, .. } => kind == EnumKind::OutFile && p == path,
                _ => false,
            };
            used.then_some(entry.name.as_str())
        })
    }

    pub fn entry(&self, idx: EnumIndex) -> Option<&EnumEntry> {
        self.entries.get(idx as usize).and_then(Option::as_ref)
    }

    pub fn entry_mut(&mut self, idx: EnumIndex) -> Option<&mut EnumEntry> {
        self.entries.get_mut(idx as usize).and_then(Option::as_mut)
    }

    pub fn kind(&self, idx: EnumIndex) -> Option<EnumKind> {
        self.entry(idx).map(|e| e.payload.kind())
    }

    /// Current value of a memo cell, if the index names one.
    pub fn memo_value(&self, idx: EnumIndex) -> Option<f64> {
        match self.entry(idx)?.payload {
            EnumPayload::Memo { value } => Some(value),
            _ => None,
        }
    }

    /// Store a value into a memo cell. Returns false if the index does not
    /// name a memo.
    pub fn store_memo(&mut self, idx: EnumIndex, value: f64) -> bool {
        match self.entry_mut(idx) {
            Some(EnumEntry {
                payload: EnumPayload::Memo { value: slot },
                ..
            }) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Indexed text of an IN_FILE or inline-text entry.
    pub fn indexed_text(&self, idx: EnumIndex) -> Option<&IndexedText> {
        match &self.entry(idx)?.payload {
            EnumPayload::InFile { text, .. } => Some(text),
            EnumPayload::InlineText { text } => Some(text),
            _ => None,
        }
    }

    /// Buffered writer of an OUT_FILE entry, if open.
    pub fn out_writer_mut(&mut self, idx: EnumIndex) -> Option<&mut BufWriter<File>> {
        match &mut self.entry_mut(idx)?.payload {
            EnumPayload::OutFile { writer, .. } => writer.as_mut(),
            _ => None,
        }
    }

    /// Iterate the 32 filter slots; unoccupied slots yield `None`.
    pub fn filter_slots(&self) -> impl Iterator<Item = Option<&EnumEntry>> {
        self.entries[..FILTER_SLOTS].iter().map(Option::as_ref)
    }

    /// Iterate all occupied non-filter entries with their indices.
    pub fn general_entries(&self) -> impl Iterator<Item = (EnumIndex, &EnumEntry)> {
        self.entries
            .iter()
            .enumerate()
            .skip(FILTER_SLOTS)
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as EnumIndex, e)))
    }

    /// Iterate mutable OUT_FILE writers, for the shutdown flush.
    pub fn out_writers_mut(&mut self) -> impl Iterator<Item = &mut BufWriter<File>> {
        self.entries.iter_mut().flatten().filter_map(|e| {
            if let EnumPayload::OutFile { writer, .. } = &mut e.payload {
                writer.as_mut()
            } else {
                None
            }
        })
    }
}

/// Indexed text: a concatenation of `(length byte, payload)` records
/// terminated by a zero-length record. An integer value selects one record;
/// indices past the end clamp to the last record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedText {
    blob: Vec<u8>,
}

impl IndexedText {
    /// An empty list, used as a placeholder in check-only mode where the
    /// IN_FILE contents are not loaded.
    pub fn empty() -> Self {
        IndexedText { blob: vec![0] }
    }

    /// Build from explicit options. Every option must be 1..=255 bytes and
    /// at least two options are required.
    pub fn from_options(options: &[&str]) -> Result<Self, ParseErrorCode> {
        if options.len() < 2 {
            return Err(ParseErrorCode::IndexedTextTwoOptions);
        }

        let mut blob = Vec::new();
        for option in options {
            let bytes = option.as_bytes();
            if bytes.is_empty() || bytes.len() > 255 {
                return Err(ParseErrorCode::IndexedTextLength);
            }
            blob.push(bytes.len() as u8);
            blob.extend_from_slice(bytes);
        }
        blob.push(0);
        Ok(IndexedText { blob })
    }

    /// Build from the contents of an IN_FILE file; each `\n` delimits an
    /// option, a trailing `\r` is stripped from every line.
    pub fn from_file_content(content: &str) -> Result<Self, ParseErrorCode> {
        let lines: Vec<&str> = content
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();

        if lines.len() < 2 {
            return Err(ParseErrorCode::InFileMinTwoLines);
        }

        for line in &lines {
            if line.is_empty() || line.len() > 255 {
                return Err(ParseErrorCode::InFileOptions);
            }
        }

        Self::from_options(&lines).map_err(|_| ParseErrorCode::InFileOptions)
    }

    /// Select the record with the given index, clamping to the last record.
    pub fn select(&self, index: u64) -> String {
        let mut pos = 0usize;
        let mut remaining = index;

        loop {
            let len = self.blob[pos] as usize;
            if len == 0 {
                return String::new();
            }

            let next = pos + 1 + len;
            if remaining == 0 || self.blob.get(next).copied().unwrap_or(0) == 0 {
                let payload = &self.blob[pos + 1..next];
                return String::from_utf8_lossy(payload).into_owned();
            }

            pos = next;
            remaining -= 1;
        }
    }

    /// Number of records in the list.
    pub fn option_count(&self) -> usize {
        let mut pos = 0usize;
        let mut count = 0;
        while self.blob[pos] != 0 {
            pos += 1 + self.blob[pos] as usize;
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_slots_reserved() {
        let mut table = EnumTable::new();
        let memo = table
            .add("M_X", EnumPayload::Memo { value: 0.0 })
            .unwrap();
        assert!(memo as usize >= FILTER_SLOTS);

        let filter = table.add_filter("F_SYS", None).unwrap();
        assert_eq!(filter, 0);
        let filter2 = table.add_filter("F_APP", Some("app".into())).unwrap();
        assert_eq!(filter2, 1);
    }

    #[test]
    fn test_filter_limit() {
        let mut table = EnumTable::new();
        for i in 0..FILTER_SLOTS {
            table.add_filter(format!("F_{i}"), None).unwrap();
        }
        assert_eq!(
            table.add_filter("F_OVER", None),
            Err(ParseErrorCode::FilterMaxCount)
        );
    }

    #[test]
    fn test_find_respects_kind() {
        let mut table = EnumTable::new();
        let memo = table.add("NAME", EnumPayload::Memo { value: 1.5 }).unwrap();
        assert_eq!(table.find("NAME", EnumKind::Memo), memo);
        assert_eq!(table.find("NAME", EnumKind::OutFile), 0);
        assert_eq!(table.find("OTHER", EnumKind::Memo), 0);
    }

    #[test]
    fn test_name_exists_covers_filters() {
        let mut table = EnumTable::new();
        table.add_filter("F_SYS", None).unwrap();
        assert!(table.name_exists("F_SYS"));
        assert!(!table.name_exists("F_OTHER"));
    }

    #[test]
    fn test_memo_store_and_load() {
        let mut table = EnumTable::new();
        let memo = table.add("M_T", EnumPayload::Memo { value: 2.0 }).unwrap();
        assert_eq!(table.memo_value(memo), Some(2.0));
        assert!(table.store_memo(memo, 7.25));
        assert_eq!(table.memo_value(memo), Some(7.25));
        assert!(!table.store_memo(0, 1.0));
    }

    #[test]
    fn test_path_in_use() {
        let mut table = EnumTable::new();
        table
            .add(
                "LOG",
                EnumPayload::OutFile {
                    writer: None,
                    path: PathBuf::from("x.log"),
                },
            )
            .unwrap();
        assert_eq!(
            table.path_in_use(Path::new("x.log"), EnumKind::OutFile),
            Some("LOG")
        );
        assert_eq!(table.path_in_use(Path::new("x.log"), EnumKind::InFile), None);
    }

    #[test]
    fn test_indexed_text_select() {
        let text = IndexedText::from_options(&["ok", "warn", "err"]).unwrap();
        assert_eq!(text.select(0), "ok");
        assert_eq!(text.select(1), "warn");
        assert_eq!(text.select(2), "err");
        // Out-of-range selection clamps to the last option
        assert_eq!(text.select(5), "err");
        assert_eq!(text.option_count(), 3);
    }

    #[test]
    fn test_indexed_text_needs_two_options() {
        assert_eq!(
            IndexedText::from_options(&["only"]),
            Err(ParseErrorCode::IndexedTextTwoOptions)
        );
    }

    #[test]
    fn test_indexed_text_option_length() {
        let long = "x".repeat(256);
        assert_eq!(
            IndexedText::from_options(&["ok", &long]),
            Err(ParseErrorCode::IndexedTextLength)
        );
        assert_eq!(
            IndexedText::from_options(&["", "b"]),
            Err(ParseErrorCode::IndexedTextLength)
        );
    }

    #[test]
    fn test_indexed_text_from_file_content() {
        let text = IndexedText::from_file_content("idle\r\nrunning\nstopped\n").unwrap();
        assert_eq!(text.select(0), "idle");
        assert_eq!(text.select(1), "running");
        assert_eq!(text.select(2), "stopped");
    }

    #[test]
    fn test_indexed_text_file_needs_two_lines() {
        assert_eq!(
            IndexedText::from_file_content("only\n"),
            Err(ParseErrorCode::InFileMinTwoLines)
        );
    }
}
