// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Minimal C-printf interpolator.
//!
//! Format strings in the definition files are printf templates; decoded
//! values are substituted through this module so the observable text matches
//! the C runtime. Supported: flags `- + 0 #` and space, width, precision,
//! the `h`/`l` length modifiers (accepted and ignored, all values are
//! 64-bit), and the conversions `d i u o x X c s e E f F g G a A`.

/// The value substituted into a template.
#[derive(Debug, Clone, Copy)]
pub enum PrintfArg<'a> {
    /// No value: only `%%` escapes are substituted.
    None,
    Uint(u64),
    Int(i64),
    Double(f64),
    Str(&'a str),
}

/// Render a printf template with the given argument. Every conversion in
/// the template consumes the same argument; templates built by the format
/// compiler carry at most one.
pub fn format_printf(template: &str, arg: PrintfArg) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len() + 16);
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'%' {
                i += 1;
            }
            out.push_str(&template[start..i]);
            continue;
        }

        if bytes.get(i + 1) == Some(&b'%') {
            out.push('%');
            i += 2;
            continue;
        }

        match parse_spec(bytes, i + 1) {
            Some((spec, next)) => {
                out.push_str(&render(&spec, arg));
                i = next;
            }
            None => {
                // Malformed conversion: emit it verbatim
                out.push('%');
                i += 1;
            }
        }
    }

    out
}

#[derive(Debug, Default)]
struct Spec {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: u8,
}

fn parse_spec(bytes: &[u8], mut i: usize) -> Option<(Spec, usize)> {
    let mut spec = Spec::default();

    loop {
        match *bytes.get(i)? {
            b'-' => spec.minus = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'0' => spec.zero = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        i += 1;
    }

    let mut width = 0usize;
    let mut have_width = false;
    while let Some(d) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
        width = width * 10 + usize::from(d - b'0');
        have_width = true;
        i += 1;
    }
    if have_width {
        spec.width = Some(width);
    }

    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let mut precision = 0usize;
        while let Some(d) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
            precision = precision * 10 + usize::from(d - b'0');
            i += 1;
        }
        spec.precision = Some(precision);
    }

    while matches!(bytes.get(i), Some(&b'h') | Some(&b'l')) {
        i += 1;
    }

    let conv = *bytes.get(i)?;
    if !b"diouxXcseEfFgGaA".contains(&conv) {
        return None;
    }
    spec.conv = conv;

    Some((spec, i + 1))
}

fn render(spec: &Spec, arg: PrintfArg) -> String {
    match spec.conv {
        b'd' | b'i' => render_signed(spec, as_i64(arg)),
        b'u' => render_unsigned(spec, as_u64(arg), 10, false),
        b'o' => render_unsigned(spec, as_u64(arg), 8, false),
        b'x' => render_unsigned(spec, as_u64(arg), 16, false),
        b'X' => render_unsigned(spec, as_u64(arg), 16, true),
        b'c' => {
            let c = (as_u64(arg) & 0xFF) as u8 as char;
            pad(spec, c.to_string(), false)
        }
        b's' => {
            let text = match arg {
                PrintfArg::Str(s) => s.to_string(),
                _ => String::new(),
            };
            let text = match spec.precision {
                Some(p) if text.len() > p => {
                    let mut end = p;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text[..end].to_string()
                }
                _ => text,
            };
            pad(spec, text, false)
        }
        b'f' | b'F' => render_fixed(spec, as_f64(arg), spec.conv == b'F'),
        b'e' | b'E' => render_scientific(spec, as_f64(arg), spec.conv == b'E'),
        b'g' | b'G' => render_general(spec, as_f64(arg), spec.conv == b'G'),
        b'a' | b'A' => render_hex_float(spec, as_f64(arg), spec.conv == b'A'),
        _ => String::new(),
    }
}

fn as_u64(arg: PrintfArg) -> u64 {
    match arg {
        PrintfArg::Uint(v) => v,
        PrintfArg::Int(v) => v as u64,
        PrintfArg::Double(v) => v as u64,
        _ => 0,
    }
}

fn as_i64(arg: PrintfArg) -> i64 {
    match arg {
        PrintfArg::Uint(v) => v as i64,
        PrintfArg::Int(v) => v,
        PrintfArg::Double(v) => v as i64,
        _ => 0,
    }
}

fn as_f64(arg: PrintfArg) -> f64 {
    match arg {
        PrintfArg::Uint(v) => v as f64,
        PrintfArg::Int(v) => v as f64,
        PrintfArg::Double(v) => v,
        _ => 0.0,
    }
}

fn sign_prefix(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn render_signed(spec: &Spec, value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let digits = apply_int_precision(spec, digits);
    let text = format!("{}{digits}", sign_prefix(spec, value < 0));
    pad(spec, text, spec.precision.is_none())
}

fn render_unsigned(spec: &Spec, value: u64, radix: u32, upper: bool) -> String {
    let digits = match radix {
        8 => format!("{value:o}"),
        16 if upper => format!("{value:X}"),
        16 => format!("{value:x}"),
        _ => value.to_string(),
    };
    let digits = apply_int_precision(spec, digits);

    let prefix = if spec.alt && value != 0 {
        match radix {
            8 if !digits.starts_with('0') => "0",
            16 if upper => "0X",
            16 => "0x",
            _ => "",
        }
    } else {
        ""
    };

    pad(spec, format!("{prefix}{digits}"), spec.precision.is_none())
}

/// Integer precision: minimum number of digits, zero-padded.
fn apply_int_precision(spec: &Spec, digits: String) -> String {
    match spec.precision {
        Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
        _ => digits,
    }
}

fn render_fixed(spec: &Spec, value: f64, upper: bool) -> String {
    if !value.is_finite() {
        return pad(spec, non_finite(value, upper, spec), false);
    }

    let precision = spec.precision.unwrap_or(6);
    let body = format!("{:.precision$}", value.abs());
    let text = format!("{}{body}", sign_prefix(spec, value.is_sign_negative()));
    pad(spec, text, true)
}

fn render_scientific(spec: &Spec, value: f64, upper: bool) -> String {
    if !value.is_finite() {
        return pad(spec, non_finite(value, upper, spec), false);
    }

    let precision = spec.precision.unwrap_or(6);
    let text = scientific_body(value.abs(), precision, upper);
    let text = format!("{}{text}", sign_prefix(spec, value.is_sign_negative()));
    pad(spec, text, true)
}

/// `{mantissa}e{sign}{exponent:02}` for a non-negative finite value.
fn scientific_body(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{value:.precision$e}");
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exp.abs())
}

fn render_general(spec: &Spec, value: f64, upper: bool) -> String {
    if !value.is_finite() {
        return pad(spec, non_finite(value, upper, spec), false);
    }

    let p = match spec.precision {
        None => 6,
        Some(0) => 1,
        Some(p) => p,
    };

    // Decimal exponent after rounding to P significant digits
    let rounded = format!("{:.*e}", p - 1, value.abs());
    let exp: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let body = if exp >= -4 && exp < p as i32 {
        let frac = (p as i32 - 1 - exp).max(0) as usize;
        let text = format!("{:.frac$}", value.abs());
        strip_general_zeros(text, spec.alt)
    } else {
        let text = scientific_body(value.abs(), p - 1, upper);
        if spec.alt {
            text
        } else {
            // Strip trailing zeros of the mantissa
            match text.split_once(if upper { 'E' } else { 'e' }) {
                Some((mant, exp_part)) => {
                    let mant = strip_general_zeros(mant.to_string(), false);
                    format!("{mant}{}{exp_part}", if upper { 'E' } else { 'e' })
                }
                None => text,
            }
        }
    };

    let text = format!("{}{body}", sign_prefix(spec, value.is_sign_negative()));
    pad(spec, text, true)
}

fn strip_general_zeros(text: String, alt: bool) -> String {
    if alt || !text.contains('.') {
        return text;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

fn render_hex_float(spec: &Spec, value: f64, upper: bool) -> String {
    if !value.is_finite() {
        return pad(spec, non_finite(value, upper, spec), false);
    }

    let bits = value.abs().to_bits();
    let raw_exp = ((bits >> 52) & 0x7FF) as i64;
    let frac = bits & 0xF_FFFF_FFFF_FFFF;

    let (lead, mut exp, mut mantissa) = if raw_exp == 0 && frac == 0 {
        ('0', 0i64, 0u64)
    } else if raw_exp == 0 {
        ('0', -1022, frac)
    } else {
        ('1', raw_exp - 1023, frac)
    };

    // Round the 13 mantissa nibbles to the requested precision
    match spec.precision {
        Some(p) if (1..13).contains(&p) => {
            let drop_bits = 52 - 4 * p as u32;
            let half = 1u64 << (drop_bits - 1);
            let rounded = mantissa.wrapping_add(half) >> drop_bits;
            if rounded >> (4 * p as u32) != 0 {
                mantissa = 0; // carry out of the mantissa
                exp += 1;
            } else {
                mantissa = rounded << drop_bits;
            }
        }
        Some(0) => mantissa = 0,
        _ => {}
    }

    let mut hex = format!("{mantissa:013x}");
    match spec.precision {
        None => hex = hex.trim_end_matches('0').to_string(),
        Some(p) => hex.truncate(p),
    }

    let exp_sign = if exp < 0 { '-' } else { '+' };
    let mut text = if hex.is_empty() {
        format!("0x{lead}p{exp_sign}{}", exp.abs())
    } else {
        format!("0x{lead}.{hex}p{exp_sign}{}", exp.abs())
    };

    if upper {
        text = text.to_uppercase();
    }

    let text = format!("{}{text}", sign_prefix(spec, value.is_sign_negative()));
    pad(spec, text, false)
}

fn non_finite(value: f64, upper: bool, spec: &Spec) -> String {
    let body = if value.is_nan() {
        if upper {
            "NAN"
        } else {
            "nan"
        }
    } else if upper {
        "INF"
    } else {
        "inf"
    };
    format!("{}{body}", sign_prefix(spec, value.is_sign_negative() && !value.is_nan()))
}

/// Apply width padding. Zero padding goes between the sign (or radix
/// prefix) and the digits and only applies to numeric conversions.
fn pad(spec: &Spec, text: String, allow_zero: bool) -> String {
    let Some(width) = spec.width else {
        return text;
    };
    if text.len() >= width {
        return text;
    }

    let fill = width - text.len();
    if spec.minus {
        format!("{text}{}", " ".repeat(fill))
    } else if spec.zero && allow_zero {
        // Insert zeros after any sign or 0x prefix
        let split = text
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(0);
        let (head, tail) = text.split_at(split);
        format!("{head}{}{tail}", "0".repeat(fill))
    } else {
        format!("{}{text}", " ".repeat(fill))
    }
}
