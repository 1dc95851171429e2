// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # RTEmsg
//!
//! Decoder library for binary trace buffers produced by the RTEdbg embedded
//! logging library. Decoding is driven by programmer-authored format
//! definition files which describe how the bits of each logged message map to
//! printf-style output values.
//!
//! The library is organized into two tightly coupled halves:
//! - **Format compiler** in [`parser`]: reads `.fmt`/`.h` definition files,
//!   validates the RTEdbg directive language, builds one decoding plan per
//!   message type, and (in compile mode) regenerates header files assigning
//!   numeric IDs to symbolic message names.
//! - **Binary decoder** in [`decode`]: reassembles variable-length messages
//!   from the 32-bit word stream, reconstructs the 64-bit timestamp, and
//!   executes the compiled plan for every message, routing formatted text to
//!   the requested output files.
//!
//! Supporting modules: [`core`] holds the error bands, value registers and
//! the enum table; [`format`] holds the plan model and the format-ID
//! allocator; [`io`] loads the trace file and manages output files; [`cli`]
//! parses the tool's invocation grammar.
//!
//! ## Example: compiling format files and decoding a capture
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rtemsg::cli::Params;
//! use rtemsg::decode::Decoder;
//!
//! let params = Params::from_args(["out", "fmt", "-N=11", "capture.bin"].map(String::from))?;
//! let mut decoder = Decoder::new(params)?;
//! decoder.compile_format_files()?;
//! decoder.decode_binary_file()?;
//! decoder.finish()?;
//! # Ok(())
//! # }
//! ```

// Error bands, value registers, enum table
pub mod core;

// Re-export the core types for convenience
pub use crate::core::{DecodeError, FatalError, ParseError, Result};

// Decoding-plan model and format-ID allocation
pub mod format;

// Format-definition compiler
pub mod parser;

// Trace-file loading and output-file management
pub mod io;

// Binary-stream decoder
pub mod decode;

// Invocation-grammar parsing
pub mod cli;

pub use crate::cli::Params;
pub use crate::decode::Decoder;
pub use crate::format::{FormatTable, MsgKind, MsgPlan, PrintKind, ValueKind, ValueSlot};
