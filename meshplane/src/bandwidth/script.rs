//! Textual script representation for [`BandwidthFunction`](super::BandwidthFunction).
//!
//! A script is a self-contained line-oriented text document. Every script declares a
//! `degree` and a body describing how to evaluate any non-trivial subset of that
//! degree; the grammar is treated as opaque by any host outside this crate, and this
//! module is the only place that parses or emits it. [`ScriptAst`] is the parsed form;
//! [`eval`] is the evaluator. Nothing here calls back into [`super::function`] — the
//! script format stands on its own.

use crate::goalset::GoalSet;
use crate::bandwidth::range::{BandwidthPair, BandwidthRange};
use std::fmt::Write as _;
use thiserror::Error;

/// Error parsing or evaluating a script.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    /// A line did not match the expected grammar at this point.
    #[error("line {line}: unexpected content: {content}")]
    UnexpectedToken {
        /// 1-based line number
        line: usize,
        /// The offending line, verbatim
        content: String,
    },
    /// The script ended before a block was closed.
    #[error("script ended while still inside a `{0}` block")]
    UnterminatedBlock(&'static str),
    /// A numeric field failed to parse.
    #[error("line {line}: invalid number: {content}")]
    InvalidNumber {
        /// 1-based line number
        line: usize,
        /// The offending token
        content: String,
    },
    /// No `degree` line was found before the body.
    #[error("script is missing its `degree` declaration")]
    MissingDegree,
}

/// Parsed form of a script. Mirrors the shape of the concrete
/// [`BandwidthFunction`](super::BandwidthFunction) variants, but is evaluated directly
/// by [`eval`] rather than reconstituting one of them.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAst {
    /// A constant range for every edge.
    Flat(BandwidthRange),
    /// `(from, to)` cells, `from != to`.
    Matrix(Vec<((usize, usize), BandwidthRange)>),
    /// Per-endpoint ingress/egress pairs, ordered by endpoint index.
    Pair(Vec<BandwidthPair>),
    /// A dense lookup table, indexed by `bit-pattern - 1`.
    Table(Vec<BandwidthRange>),
    /// A reduction of a nested script onto coarser groups.
    Reduced {
        /// `groups[i]` is the base-degree set backing reduced index `i`.
        groups: Vec<GoalSet>,
        /// The degree of `base`.
        base_degree: usize,
        /// The wrapped script.
        base: Box<ScriptAst>,
    },
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{}", x),
        None => "inf".to_string(),
    }
}

fn parse_opt(line: usize, tok: &str) -> Result<Option<f64>, ScriptError> {
    if tok == "inf" {
        Ok(None)
    } else {
        tok.parse::<f64>()
            .map(Some)
            .map_err(|_| ScriptError::InvalidNumber { line, content: tok.to_string() })
    }
}

/// Render a degree + [`ScriptAst`] as the canonical script text.
pub fn serialize(degree: usize, ast: &ScriptAst) -> String {
    let mut out = String::new();
    writeln!(out, "degree {}", degree).ok();
    write_body(&mut out, ast);
    out
}

fn write_body(out: &mut String, ast: &ScriptAst) {
    match ast {
        ScriptAst::Flat(r) => {
            writeln!(out, "flat {} {}", r.min(), fmt_opt(r.max())).ok();
        }
        ScriptAst::Matrix(cells) => {
            writeln!(out, "matrix").ok();
            for ((from, to), r) in cells {
                writeln!(out, "{} {} {} {}", from, to, r.min(), fmt_opt(r.max())).ok();
            }
            writeln!(out, "end").ok();
        }
        ScriptAst::Pair(pairs) => {
            writeln!(out, "pair").ok();
            for (idx, p) in pairs.iter().enumerate() {
                writeln!(
                    out,
                    "{} {} {} {} {}",
                    idx,
                    p.ingress.min(),
                    fmt_opt(p.ingress.max()),
                    p.egress.min(),
                    fmt_opt(p.egress.max())
                )
                .ok();
            }
            writeln!(out, "end").ok();
        }
        ScriptAst::Table(entries) => {
            writeln!(out, "table").ok();
            for (idx, r) in entries.iter().enumerate() {
                writeln!(out, "{} {} {}", idx + 1, r.min(), fmt_opt(r.max())).ok();
            }
            writeln!(out, "end").ok();
        }
        ScriptAst::Reduced { groups, base_degree, base } => {
            writeln!(out, "reduced").ok();
            for (idx, g) in groups.iter().enumerate() {
                writeln!(out, "{} {}", idx, g.to_hex_string()).ok();
            }
            writeln!(out, "end").ok();
            writeln!(out, "base {}", base_degree).ok();
            write_body(out, base);
            writeln!(out, "endbase").ok();
        }
    }
}

/// Parse a script, returning its declared degree and parsed body.
pub fn parse(text: &str) -> Result<(usize, ScriptAst), ScriptError> {
    let mut lines = text.lines().enumerate().peekable();
    let (_, first) = lines.next().ok_or(ScriptError::MissingDegree)?;
    let degree = first
        .strip_prefix("degree ")
        .ok_or(ScriptError::MissingDegree)?
        .trim()
        .parse::<usize>()
        .map_err(|_| ScriptError::InvalidNumber { line: 1, content: first.to_string() })?;
    let ast = parse_body(&mut lines, degree)?;
    Ok((degree, ast))
}

type Lines<'a> = std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>;

fn parse_body(lines: &mut Lines<'_>, degree: usize) -> Result<ScriptAst, ScriptError> {
    let (lineno, header) = lines.next().ok_or(ScriptError::UnterminatedBlock("script"))?;
    let header = header.trim();
    if let Some(rest) = header.strip_prefix("flat ") {
        let mut parts = rest.split_whitespace();
        let min = parts
            .next()
            .ok_or(ScriptError::UnexpectedToken { line: lineno + 1, content: header.to_string() })?
            .parse::<f64>()
            .map_err(|_| ScriptError::InvalidNumber { line: lineno + 1, content: rest.to_string() })?;
        let max_tok = parts
            .next()
            .ok_or(ScriptError::UnexpectedToken { line: lineno + 1, content: header.to_string() })?;
        let max = parse_opt(lineno + 1, max_tok)?;
        return Ok(ScriptAst::Flat(BandwidthRange::new(min, max)));
    }
    match header {
        "matrix" => {
            let mut cells = Vec::new();
            loop {
                let (ln, line) = lines.next().ok_or(ScriptError::UnterminatedBlock("matrix"))?;
                let line = line.trim();
                if line == "end" {
                    break;
                }
                let mut parts = line.split_whitespace();
                let from: usize = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let to: usize = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let min: f64 = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let max = parse_opt(ln + 1, parts.next().unwrap_or("inf"))?;
                cells.push(((from, to), BandwidthRange::new(min, max)));
            }
            Ok(ScriptAst::Matrix(cells))
        }
        "pair" => {
            let mut pairs = Vec::new();
            loop {
                let (ln, line) = lines.next().ok_or(ScriptError::UnterminatedBlock("pair"))?;
                let line = line.trim();
                if line == "end" {
                    break;
                }
                let mut parts = line.split_whitespace();
                let _idx: usize = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let imin: f64 = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let imax = parse_opt(ln + 1, parts.next().unwrap_or("inf"))?;
                let emin: f64 = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let emax = parse_opt(ln + 1, parts.next().unwrap_or("inf"))?;
                pairs.push(BandwidthPair::new(
                    BandwidthRange::new(imin, imax),
                    BandwidthRange::new(emin, emax),
                ));
            }
            Ok(ScriptAst::Pair(pairs))
        }
        "table" => {
            let mut entries = Vec::new();
            loop {
                let (ln, line) = lines.next().ok_or(ScriptError::UnterminatedBlock("table"))?;
                let line = line.trim();
                if line == "end" {
                    break;
                }
                let mut parts = line.split_whitespace();
                let _idx: usize = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let min: f64 = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let max = parse_opt(ln + 1, parts.next().unwrap_or("inf"))?;
                entries.push(BandwidthRange::new(min, max));
            }
            Ok(ScriptAst::Table(entries))
        }
        "reduced" => {
            let mut groups = Vec::new();
            loop {
                let (ln, line) = lines.next().ok_or(ScriptError::UnterminatedBlock("reduced"))?;
                let line = line.trim();
                if line == "end" {
                    break;
                }
                let mut parts = line.split_whitespace();
                let _idx: usize = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ScriptError::InvalidNumber { line: ln + 1, content: line.to_string() })?;
                let hex = parts
                    .next()
                    .ok_or(ScriptError::UnexpectedToken { line: ln + 1, content: line.to_string() })?;
                let value = u128::from_str_radix(hex.trim_start_matches("0x"), 16)
                    .map_err(|_| ScriptError::InvalidNumber { line: ln + 1, content: hex.to_string() })?;
                groups.push(value);
            }
            let (ln, base_header) =
                lines.next().ok_or(ScriptError::UnterminatedBlock("reduced"))?;
            let base_degree = base_header
                .trim()
                .strip_prefix("base ")
                .ok_or(ScriptError::UnexpectedToken { line: ln + 1, content: base_header.to_string() })?
                .parse::<usize>()
                .map_err(|_| ScriptError::InvalidNumber {
                    line: ln + 1,
                    content: base_header.to_string(),
                })?;
            let base = parse_body(lines, base_degree)?;
            let (ln, closing) = lines.next().ok_or(ScriptError::UnterminatedBlock("base"))?;
            if closing.trim() != "endbase" {
                return Err(ScriptError::UnexpectedToken {
                    line: ln + 1,
                    content: closing.to_string(),
                });
            }
            let groups = groups
                .into_iter()
                .map(|bits| {
                    let words = bits_to_words(bits, base_degree);
                    GoalSet::from_words(base_degree, words)
                })
                .collect();
            Ok(ScriptAst::Reduced { groups, base_degree, base: Box::new(base) })
        }
        other => {
            let _ = degree;
            Err(ScriptError::UnexpectedToken { line: lineno + 1, content: other.to_string() })
        }
    }
}

fn bits_to_words(bits: u128, degree: usize) -> Vec<u64> {
    let word_count = (degree + 63) / 64;
    let mut words = vec![0u64; word_count.max(1)];
    if word_count >= 1 {
        words[0] = bits as u64;
    }
    if word_count >= 2 {
        words[1] = (bits >> 64) as u64;
    }
    words
}

/// Evaluate a parsed script against a non-trivial subset `s` of `degree`.
pub fn eval(degree: usize, ast: &ScriptAst, s: &GoalSet) -> Result<BandwidthRange, ScriptError> {
    match ast {
        ScriptAst::Flat(r) => Ok(*r),
        ScriptAst::Matrix(cells) => {
            let mut total = BandwidthRange::zero();
            for ((from, to), r) in cells {
                let from_in = s.contains(*from).unwrap_or(false);
                let to_in = s.contains(*to).unwrap_or(false);
                if from_in && !to_in {
                    total = total.add(r);
                }
            }
            Ok(total)
        }
        ScriptAst::Pair(pairs) => {
            let mut ingress_in = BandwidthRange::zero();
            let mut egress_out = BandwidthRange::zero();
            for (i, p) in pairs.iter().enumerate() {
                if s.contains(i).unwrap_or(false) {
                    ingress_in = ingress_in.add(&p.ingress);
                } else {
                    egress_out = egress_out.add(&p.egress);
                }
            }
            Ok(ingress_in.min_with(&egress_out))
        }
        ScriptAst::Table(entries) => {
            let words = s.to_words();
            let bits = words.first().copied().unwrap_or(0) as u128
                | (words.get(1).copied().unwrap_or(0) as u128) << 64;
            let idx = (bits - 1) as usize;
            entries
                .get(idx)
                .copied()
                .ok_or(ScriptError::UnexpectedToken { line: 0, content: "table index".into() })
        }
        ScriptAst::Reduced { groups, base_degree, base } => {
            let mut words = vec![0u64; (*base_degree + 63) / 64];
            for (i, group) in groups.iter().enumerate() {
                if s.contains(i).unwrap_or(false) {
                    for (w, gw) in words.iter_mut().zip(group.to_words()) {
                        *w |= gw;
                    }
                }
            }
            let base_set = GoalSet::from_words(*base_degree, words);
            eval(*base_degree, base, &base_set)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flat_roundtrip() {
        let ast = ScriptAst::Flat(BandwidthRange::new(1.0, Some(2.0)));
        let text = serialize(4, &ast);
        let (degree, parsed) = parse(&text).unwrap();
        assert_eq!(degree, 4);
        assert_eq!(parsed, ast);
        let s = GoalSet::from_indices(4, vec![0]).unwrap();
        assert_eq!(eval(degree, &parsed, &s).unwrap(), BandwidthRange::new(1.0, Some(2.0)));
    }

    #[test]
    fn table_roundtrip() {
        let entries = vec![BandwidthRange::new(1.0, None), BandwidthRange::new(2.0, Some(3.0))];
        let ast = ScriptAst::Table(entries.clone());
        let text = serialize(2, &ast);
        let (degree, parsed) = parse(&text).unwrap();
        let s = GoalSet::from_indices(degree, vec![0]).unwrap();
        assert_eq!(eval(degree, &parsed, &s).unwrap(), entries[0]);
    }
}
