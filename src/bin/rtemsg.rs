// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # RTEmsg CLI
//!
//! Decodes RTEdbg binary trace buffers using format definition files.
//!
//! ## Usage
//!
//! ```sh
//! # Decode a capture
//! rtemsg out_folder fmt_folder -N=11 capture.bin
//!
//! # Check the format files and regenerate the headers
//! rtemsg out_folder fmt_folder -c -N=11
//!
//! # All parameters from a file
//! rtemsg @rtemsg.cfg
//! ```
//!
//! Exit codes: 0 = no errors, 1 = format-parse errors, 2 = fatal decode
//! errors, 3 = non-fatal decode errors (buffer finished), 10..18 = start-up
//! failures.

use std::process;

use anyhow::Context;
use rtemsg::core::FatalError;
use rtemsg::{Decoder, Params};

fn run() -> anyhow::Result<i32> {
    let params = Params::from_args(std::env::args().skip(1))?;

    if params.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rtemsg=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let mut decoder = Decoder::new(params)?;

    decoder
        .compile_format_files()
        .context("format definition processing failed")?;

    if decoder.parse_errors() > 0 {
        if !decoder.params().check_only {
            eprintln!("Errors were detected during format definition processing.");
            decoder.discard_outputs();
        }
        return Ok(1);
    }

    decoder
        .decode_binary_file()
        .context("binary data file processing failed")?;

    Ok(decoder.finish()?)
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            err.downcast_ref::<FatalError>()
                .map(FatalError::exit_code)
                .unwrap_or(2)
        }
    };

    process::exit(code);
}
