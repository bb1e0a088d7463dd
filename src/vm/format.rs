//! `Printf` formatting: `%d`, `%g`, `%c`, `%s` and `%%`.

use super::{Fault, Value};

/// One piece of a parsed format string.
#[derive(Clone, Debug, PartialEq)]
pub enum Piece {
    Text(String),
    Int,
    General,
    Char,
    Str,
}

pub fn parse(format: &str) -> Result<Vec<Piece>, Fault> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            text.push(c);
            continue;
        }
        let spec = match chars.next() {
            Some('%') => {
                text.push('%');
                continue;
            }
            Some('d') => Piece::Int,
            Some('g') => Piece::General,
            Some('c') => Piece::Char,
            Some('s') => Piece::Str,
            Some(other) => return Err(Fault::BadFormat(format!("%{}", other))),
            None => return Err(Fault::BadFormat("trailing %".to_string())),
        };
        if !text.is_empty() {
            pieces.push(Piece::Text(std::mem::take(&mut text)));
        }
        pieces.push(spec);
    }
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

pub fn argument_count(pieces: &[Piece]) -> usize {
    pieces
        .iter()
        .filter(|p| !matches!(p, Piece::Text(_)))
        .count()
}

/// Render `pieces` with `args` in format order. `%s` arguments are
/// addresses resolved through `read_str`.
pub fn render(
    pieces: &[Piece],
    args: &[Value],
    read_str: impl Fn(u32) -> Result<String, Fault>,
) -> Result<String, Fault> {
    let mut out = String::new();
    let mut args = args.iter();
    for piece in pieces {
        if let Piece::Text(t) = piece {
            out.push_str(t);
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| Fault::BadFormat("missing printf argument".to_string()))?;
        match (piece, arg) {
            (Piece::Int, Value::Int(n)) => out.push_str(&n.to_string()),
            (Piece::General, Value::Float(x)) => out.push_str(&general(*x)),
            (Piece::Char, Value::Int(n)) => out.push((*n as u8) as char),
            (Piece::Str, Value::Int(address)) => out.push_str(&read_str(*address as u32)?),
            (_, other) => {
                return Err(Fault::BadFormat(format!(
                    "argument {:?} does not match {:?}",
                    other, piece
                )))
            }
        }
    }
    Ok(out)
}

/// C's `%g` with the default precision of six significant digits.
pub fn general(x: f64) -> String {
    const PRECISION: i32 = 6;
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.*e}", (PRECISION - 1) as usize, x);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..PRECISION).contains(&exponent) {
        let decimals = (PRECISION - 1 - exponent) as usize;
        strip_zeros(&format!("{:.*}", decimals, x)).to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_zeros(mantissa), sign, exponent.abs())
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
