// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Common utilities for integration tests: temp workspaces, trace-file
//! construction, decoder runs.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rtemsg::{Decoder, Params};

pub const FID_BITS: u8 = 11;
const FID_SHIFT: u32 = 32 - FID_BITS as u32;

/// Format definitions for the reserved system IDs; every decode workspace
/// parses these first so user messages start at format ID 4.
pub const SYSTEM_FMT: &str = concat!(
    "// MSG1_SYS_LONG_TIMESTAMP\n",
    "// \"long timestamp\"\n",
    "// MSG1_SYS_TSTAMP_FREQUENCY\n",
    "// \"timestamp frequency changed\"\n",
);

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let thread = format!("{:?}", std::thread::current().id());
    std::env::temp_dir().join(format!(
        "rtemsg_e2e_{}_{thread}_{nanos}_{tag}",
        std::process::id()
    ))
}

/// A self-cleaning test workspace with fmt and output folders.
pub struct Workspace {
    pub root: PathBuf,
    pub fmt_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

impl Workspace {
    pub fn new(tag: &str) -> Self {
        let root = temp_dir(tag);
        let fmt_dir = root.join("fmt");
        let out_dir = root.join("out");
        fs::create_dir_all(&fmt_dir).unwrap();

        Workspace {
            root,
            fmt_dir,
            out_dir,
        }
    }

    pub fn write_fmt(&self, name: &str, content: &str) {
        fs::write(self.fmt_dir.join(name), content).unwrap();
    }

    /// Write the main format file with the system prelude prepended.
    pub fn write_main_fmt(&self, content: &str) {
        self.write_fmt("rte_main_fmt.h", &format!("{SYSTEM_FMT}{content}"));
    }

    pub fn params(&self, extra: &[&str], bin_file: Option<&Path>) -> Params {
        let mut args = vec![
            self.out_dir.display().to_string(),
            self.fmt_dir.display().to_string(),
            format!("-N={FID_BITS}"),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        if let Some(path) = bin_file {
            args.push(path.display().to_string());
        }
        Params::from_args(args).unwrap()
    }

    /// Compile the format files and decode the given trace; returns the
    /// decoder exit code.
    pub fn decode(&self, trace: &TraceBuilder, extra: &[&str]) -> i32 {
        let bin_path = self.root.join("capture.bin");
        trace.write(&bin_path);

        let params = self.params(extra, Some(&bin_path));
        let mut decoder = Decoder::new(params).unwrap();
        decoder.compile_format_files().unwrap();
        assert_eq!(
            decoder.parse_errors(),
            0,
            "format files must compile cleanly:\n{}",
            self.read_out("Errors.log")
        );
        decoder.decode_binary_file().unwrap();
        decoder.finish().unwrap()
    }

    /// Run the compiler in check mode; returns the number of parse errors.
    pub fn check_compile(&self, extra: &[&str]) -> u64 {
        let mut args = vec!["-c"];
        args.extend_from_slice(extra);
        let params = self.params(&args, None);
        let mut decoder = Decoder::new(params).unwrap();
        decoder.compile_format_files().unwrap();
        let errors = decoder.parse_errors();
        decoder.finish().unwrap();
        errors
    }

    pub fn read_out(&self, name: &str) -> String {
        fs::read_to_string(self.out_dir.join(name)).unwrap_or_default()
    }

    pub fn main_log(&self) -> String {
        self.read_out("Main.log")
    }
}

/// Builds trace files in the embedded wire format.
pub struct TraceBuilder {
    words: Vec<u32>,
    pub timestamp_frequency: u32,
    pub long_timestamp_used: bool,
}

impl TraceBuilder {
    pub fn new() -> Self {
        TraceBuilder {
            words: Vec::new(),
            timestamp_frequency: 1_000_000,
            long_timestamp_used: false,
        }
    }

    /// Append one message: DATA words carrying `data` values, closed by a
    /// FMT word with the raw counter value `counter` (the low timestamp
    /// bits, before normalization).
    pub fn msg(&mut self, fid: u32, counter: u32, data: &[u32]) -> &mut Self {
        let ts_mask = (1u32 << (FID_SHIFT - 1)) - 1;
        self.msg_field(fid, (counter & ts_mask) << 1, data)
    }

    /// Append one message with an explicit normalized low timestamp word
    /// (the value the decoder reconstructs as `tstamp_l`).
    pub fn msg_norm(&mut self, fid: u32, normalized: u32, data: &[u32]) -> &mut Self {
        self.msg_field(fid, (normalized >> FID_BITS) & !1, data)
    }

    fn msg_field(&mut self, fid: u32, ts_field: u32, data: &[u32]) -> &mut Self {
        assert!(data.len() <= 4, "one sub-packet per call");

        // Harvest bit 31 of each DATA word into the low format-ID bits:
        // the last DATA word maps to bit 0 of the field.
        let mut harvested = 0u32;
        for (i, &value) in data.iter().enumerate() {
            let bit = (value >> 31) & 1;
            harvested |= bit << (data.len() - 1 - i);
        }

        for &value in data {
            self.words.push((value & 0x7FFF_FFFF) << 1);
        }

        let fmt = ((fid | harvested) << FID_SHIFT) | (ts_field & ((1 << FID_SHIFT) - 1)) | 1;
        self.words.push(fmt);
        self
    }

    /// Append raw words (already wire-encoded).
    pub fn raw(&mut self, words: &[u32]) -> &mut Self {
        self.words.extend_from_slice(words);
        self
    }

    /// Write a post-mortem trace file: the data followed by an erased
    /// 4-word trailer, with the write index at the end of the data.
    pub fn write(&self, path: &Path) {
        let last_index = self.words.len() as u32;
        let buffer_size = last_index + 4;

        let fid_bits_code = u32::from(FID_BITS) - 9;
        let mut cfg = (fid_bits_code << 12) | (4 << 16) | (6 << 24);
        if self.long_timestamp_used {
            cfg |= 1 << 4;
        }

        let mut bytes = Vec::new();
        for value in [
            last_index,
            0xFFFF_FFFF, // filter
            cfg,
            self.timestamp_frequency,
            0,
            buffer_size,
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for _ in 0..4 {
            bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        }

        fs::write(path, bytes).unwrap();
    }
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the timestamp column of every message line in Main.log.
pub fn message_timestamps(main_log: &str) -> Vec<f64> {
    main_log
        .lines()
        .filter(|line| line.trim_start().starts_with('N') || line.trim_start().starts_with("#N"))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            fields.next()?; // message number
            fields.next()?.parse().ok()
        })
        .collect()
}
