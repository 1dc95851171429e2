// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! End-to-end decode tests: format files plus a constructed trace buffer,
//! validated against the decoded Main.log and the auxiliary outputs.

mod common;

use common::{message_timestamps, TraceBuilder, Workspace};

/// First user format ID: the system prelude occupies 0..4.
const FID_USER: u32 = 4;

#[test]
fn test_minimal_decode() {
    let ws = Workspace::new("minimal");
    ws.write_main_fmt("// MSG0_HELLO\n// \"hello %[N]N\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 42, &[]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    assert!(log.contains("MSG0_HELLO: "), "log:\n{log}");
    assert!(log.contains("hello N00001"), "log:\n{log}");
}

#[test]
fn test_bit_field_and_scaling() {
    let ws = Workspace::new("scaling");
    ws.write_main_fmt("// MSG2_TEMP\n// \"T=%[8:16u](+0*0.1)f °C\\n\"\n");

    // 16-bit value 100 at bit address 8 of the first word
    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 7, &[100 << 8, 0]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    assert!(log.contains("T=10.0"), "log:\n{log}");
    assert!(log.contains("°C"), "log:\n{log}");
}

#[test]
fn test_msgx_routed_to_user_file() {
    let ws = Workspace::new("msgx");
    ws.write_main_fmt(concat!(
        "// OUT_FILE(LOG, \"log.txt\", \"w\")\n",
        "// MSGX_LOG >LOG\n",
        "// \"msg=%s\\n\"\n",
    ));

    // Payload "hello", size byte 5 in the last byte of the last word
    let w0 = u32::from_le_bytes(*b"hell");
    let w1 = u32::from_le_bytes([b'o', 0, 0, 5]);
    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 3, &[w0, w1]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log_file = ws.read_out("log.txt");
    assert_eq!(log_file, "msg=hello\n");
    // Routed output is not mirrored to the main log with '>'
    assert!(!ws.main_log().contains("msg=hello"));
}

#[test]
fn test_msgx_mirrored_with_double_redirect() {
    let ws = Workspace::new("msgx_mirror");
    ws.write_main_fmt(concat!(
        "// OUT_FILE(LOG, \"log.txt\", \"w\")\n",
        "// MSGX_LOG >>LOG\n",
        "// \"msg=%s\\n\"\n",
    ));

    let w0 = u32::from_le_bytes(*b"hell");
    let w1 = u32::from_le_bytes([b'o', 0, 0, 5]);
    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 3, &[w0, w1]);

    ws.decode(&trace, &[]);
    assert_eq!(ws.read_out("log.txt"), "msg=hello\n");
    assert!(ws.main_log().contains("msg=hello"));
}

#[test]
fn test_timestamp_wraps_once() {
    let ws = Workspace::new("wrap");
    ws.write_main_fmt("// MSG0_TICK\n// \"tick\\n\"\n");

    // Three messages walking the counter toward the top of its range, then
    // one past the wrap; no long timestamp in between.
    let mut trace = TraceBuilder::new();
    trace.msg_norm(FID_USER, 0xFFFD_0000, &[]);
    trace.msg_norm(FID_USER, 0xFFFE_0000, &[]);
    trace.msg_norm(FID_USER, 0xFFFF_0000, &[]);
    trace.msg_norm(FID_USER, 0x0001_0000, &[]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    let stamps = message_timestamps(&log);
    assert_eq!(stamps.len(), 4, "log:\n{log}");

    // Monotonically increasing across the wrap: the high part was bumped
    assert!(stamps[1] > stamps[0]);
    assert!(stamps[2] > stamps[1]);
    assert!(
        stamps[3] > stamps[2],
        "wrap-around must carry the high word: {stamps:?}"
    );

    // And bumped exactly once: the step over the wrap stays small
    let pre_step = stamps[2] - stamps[1];
    let wrap_step = stamps[3] - stamps[2];
    assert!(wrap_step < pre_step * 4.0, "steps: {stamps:?}");
}

#[test]
fn test_indexed_text_selection_and_clamp() {
    let ws = Workspace::new("ytext");
    ws.write_main_fmt("// MSG1_STATE\n// \"state=%[8u]{ok|warn|err}Y\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[1]);
    trace.msg(FID_USER, 2, &[5]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    assert!(log.contains("state=warn"), "log:\n{log}");
    // Out-of-range selections clamp to the last option
    assert!(log.contains("state=err"), "log:\n{log}");
}

#[test]
fn test_memo_across_messages() {
    let ws = Workspace::new("memo");
    ws.write_main_fmt(concat!(
        "// MEMO(M_PREV)\n",
        "// MSG1_SAMPLE\n",
        "// \"v=%[32u]<M_PREV>u prev=%[M_PREV]g\\n\"\n",
    ));

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[10]);
    trace.msg(FID_USER, 2, &[20]);

    ws.decode(&trace, &[]);
    let log = ws.main_log();
    // The memo is written after it is read within one message, so the
    // second message still sees the first value
    assert!(log.contains("v=10 prev=10"), "log:\n{log}");
    assert!(log.contains("v=20 prev=10"), "log:\n{log}");
}

#[test]
fn test_unfinished_block_reported() {
    let ws = Workspace::new("unfinished");
    ws.write_main_fmt("// MSG0_PING\n// \"ping\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[]);
    trace.raw(&[0xFFFF_FFFF, 0xFFFF_FFFF]);
    trace.msg(FID_USER, 2, &[]);

    let code = ws.decode(&trace, &[]);
    // Non-fatal decode errors with a finished buffer
    assert_eq!(code, 3);

    let log = ws.main_log();
    assert!(log.contains("ERR_202"), "log:\n{log}");
    assert_eq!(log.matches("ping").count(), 2);
}

#[test]
fn test_bad_block_reported_and_decoding_continues() {
    let ws = Workspace::new("badblock");
    ws.write_main_fmt("// MSG0_PING\n// \"ping\\n\"\n");

    let mut trace = TraceBuilder::new();
    // Two DATA words with no FMT word, terminated by an erased word
    trace.raw(&[2 << 1, 3 << 1, 0xFFFF_FFFF]);
    trace.msg(FID_USER, 2, &[]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 3);

    let log = ws.main_log();
    assert!(log.contains("ERR_201"), "log:\n{log}");
    assert!(log.contains("ping"), "log:\n{log}");
}

#[test]
fn test_size_mismatch_dumps_message() {
    let ws = Workspace::new("sizemismatch");
    // MSGN with a declared length of 3 words
    ws.write_main_fmt("// MSGN_3_TRIPLE\n// \"a=%u b=%u c=%u\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER + 12, 1, &[1, 2]); // only two words arrive

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 3);

    let log = ws.main_log();
    assert!(log.contains("ERR_205"), "log:\n{log}");
    assert!(!log.contains("a=1"), "slots must not print: {log}");
}

#[test]
fn test_message_number_template_option() {
    let ws = Workspace::new("nrtemplate");
    ws.write_main_fmt("// MSG0_HELLO\n// \"hello %[N]N\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[]);

    ws.decode(&trace, &["-nr=03u"]);
    assert!(ws.main_log().contains("hello 001"));
}

#[test]
fn test_statistics_outputs() {
    let ws = Workspace::new("stats");
    ws.write_main_fmt(concat!(
        "// MSG1_LOAD\n",
        "// \"load=%[32u]|cpu load|u\\n\"\n",
        "// MSG0_IDLE\n",
        "// \"idle\\n\"\n",
    ));

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[30]);
    trace.msg(FID_USER, 2, &[70]);
    trace.msg(FID_USER, 3, &[50]);

    let code = ws.decode(&trace, &["-stat=all"]);
    assert_eq!(code, 0);

    let csv = ws.read_out("Statistics.csv");
    assert!(csv.contains("\"cpu load\""), "csv:\n{csv}");
    assert!(csv.contains("70"), "csv:\n{csv}");
    assert!(csv.contains("average;50;count;3"), "csv:\n{csv}");

    let found = ws.read_out("Stat_msgs_found.txt");
    assert!(found.contains("MSG1_LOAD"), "found:\n{found}");
    let missing = ws.read_out("Stat_msgs_missing.txt");
    assert!(missing.contains("MSG0_IDLE"), "missing:\n{missing}");

    let main_stats = ws.read_out("Stat_main.log");
    assert!(main_stats.contains("Messages processed: 3"), "{main_stats}");
    assert!(main_stats.contains("MSG1_LOAD"), "{main_stats}");
}

#[test]
fn test_timestamps_csv() {
    let ws = Workspace::new("tscsv");
    ws.write_main_fmt("// MSG0_TICK\n// \"tick\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 100, &[]);
    trace.msg(FID_USER, 200, &[]);
    trace.msg(FID_USER, 300, &[]);

    ws.decode(&trace, &["-timestamps"]);
    let csv = ws.read_out("Timestamps.csv");
    // The first message has no predecessor; two difference rows follow
    assert_eq!(csv.lines().count(), 3, "csv:\n{csv}");
    assert!(csv.lines().nth(1).unwrap().starts_with("N00002;"));
}

#[test]
fn test_long_timestamp_sets_high_word() {
    let ws = Workspace::new("longts");
    ws.write_main_fmt("// MSG0_TICK\n// \"tick\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.long_timestamp_used = true;
    // A long-timestamp system message carrying high word 2, then a tick
    trace.msg(0, 0, &[2]);
    trace.msg(FID_USER, 50, &[]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    let stamps = message_timestamps(&log);
    // The tick timestamp includes the high word set by the sync message
    let multiplier = 2.0 / 1e6 / 4096.0;
    let expected = multiplier * (2.0 * 4294967296.0);
    let tick = *stamps.last().unwrap();
    assert!(
        tick > expected * 0.99,
        "tick {tick} should sit above {expected}"
    );
}

#[test]
fn test_extended_message_bits() {
    let ws = Workspace::new("extmsg");
    // One data word plus three extended bits in the format ID
    ws.write_main_fmt("// EXT_MSG1_3_EVT\n// \"v=%u ext=%[32:3u]u\\n\"\n");

    let mut trace = TraceBuilder::new();
    // Extended value 5 rides in the low format-ID bits, above the bit
    // harvested from the single data word
    trace.msg(16 | (5 << 1), 9, &[77]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0, "log:\n{}", ws.main_log());

    let log = ws.main_log();
    assert!(log.contains("v=77 ext=5"), "log:\n{log}");
}

#[test]
fn test_hex_dump_output() {
    let ws = Workspace::new("hexdump");
    ws.write_main_fmt(concat!(
        "// MSG2_RAW\n// \"bytes:%1H\"\n",
        "// MSG2_RAW16\n// \"words:%2H\"\n",
    ));

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[0x0302_0100, 0x0706_0504]);
    trace.msg(FID_USER + 4, 2, &[0x0302_0100, 0x0706_0504]);

    let code = ws.decode(&trace, &[]);
    assert_eq!(code, 0);

    let log = ws.main_log();
    assert!(log.contains("bytes:"), "log:\n{log}");
    assert!(
        log.contains("  0: 00 01 02 03 04 05 06 07 "),
        "log:\n{log}"
    );
    assert!(
        log.contains("  0: 0100 0302 0504 0706 "),
        "log:\n{log}"
    );
}

#[test]
fn test_exit_code_zero_on_clean_run() {
    let ws = Workspace::new("clean");
    ws.write_main_fmt("// MSG0_OK\n// \"ok\\n\"\n");

    let mut trace = TraceBuilder::new();
    trace.msg(FID_USER, 1, &[]);

    assert_eq!(ws.decode(&trace, &[]), 0);
    assert!(ws.read_out("Errors.log").is_empty());
}
