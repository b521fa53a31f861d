//! Shot range index over raw config lines.
//!
//! Maps `(sequence, shot)` to the half-open line span of its block so
//! editors can splice text in place without re-serializing the model.
//! Built from the raw lines, not from the parsed model, but block
//! fields are read with the parser's own rules so both agree on where
//! a shot lives.

use std::collections::BTreeMap;

use crate::config_parser::{
    block_sequence, parse_block_fields, NAME_KEY, SECTION_DELIMITER, SHOT_KEY, UNKNOWN_ID,
    UNNAMED_SUBSHOT,
};
use crate::types::ShotKey;

/// Half-open span of 0-based line indices. `start` is the opening delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotRange {
    pub start: usize,
    pub end: usize,
}

impl ShotRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One delimited block with its resolved identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotBlock {
    pub sequence: String,
    pub shot: String,
    pub name: String,
    pub range: ShotRange,
}

/// Split text into lines that keep their terminators, so that
/// `lines.concat()` reproduces the input byte for byte.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

fn is_delimiter(line: &str) -> bool {
    line.trim() == SECTION_DELIMITER
}

/// Index of the first delimiter line, or `lines.len()` when there is none.
pub fn globals_end<S: AsRef<str>>(lines: &[S]) -> usize {
    lines
        .iter()
        .position(|l| is_delimiter(l.as_ref()))
        .unwrap_or(lines.len())
}

/// Every non-empty shot block in file order.
///
/// The final block runs to end of file. Blocks with no fields are
/// skipped, as the parser skips them.
pub fn scan_blocks<S: AsRef<str>>(lines: &[S]) -> Vec<ShotBlock> {
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_delimiter(l.as_ref()))
        .map(|(i, _)| i)
        .collect();

    let mut blocks = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        let fields = parse_block_fields(lines[start + 1..end].iter().map(|l| l.as_ref()));
        if fields.is_empty() {
            continue;
        }
        blocks.push(ShotBlock {
            sequence: block_sequence(&fields).unwrap_or(UNKNOWN_ID).to_string(),
            shot: fields
                .get(SHOT_KEY)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_ID)
                .to_string(),
            name: fields
                .get(NAME_KEY)
                .map(String::as_str)
                .unwrap_or(UNNAMED_SUBSHOT)
                .to_string(),
            range: ShotRange { start, end },
        });
    }
    blocks
}

/// Map each `(sequence, shot)` to its line span.
///
/// Adjacent blocks of the same shot (its subshots) coalesce into one
/// span. If a shot reappears after another shot's block, the later
/// occurrence replaces the earlier one.
pub fn scan_ranges<S: AsRef<str>>(lines: &[S]) -> BTreeMap<ShotKey, ShotRange> {
    let mut ranges: BTreeMap<ShotKey, ShotRange> = BTreeMap::new();
    let mut previous: Option<ShotKey> = None;

    for block in scan_blocks(lines) {
        let key = (block.sequence, block.shot);
        let extends_previous = previous.as_ref() == Some(&key)
            && ranges.get(&key).map(|r| r.end) == Some(block.range.start);
        if extends_previous {
            if let Some(range) = ranges.get_mut(&key) {
                range.end = block.range.end;
            }
        } else {
            ranges.insert(key.clone(), block.range);
        }
        previous = Some(key);
    }
    ranges
}
