//! In-place edits of the raw config lines.
//!
//! Every edit works on the lines returned by
//! [`split_lines`](crate::shot_range::split_lines) and touches only the
//! blocks it targets, so re-parsing the edited text yields the same model
//! apart from the fields the edit changed.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::config_parser::SECTION_DELIMITER;
use crate::error::CoreError;
use crate::job_family::JobFamily;
use crate::shot_range::{globals_end, scan_blocks, split_lines, ShotBlock, ShotRange};
use crate::types::FieldMap;

pub const DISABLED_KEY: &str = "DISABLED";

/// Status value written after a successful dispatch.
pub const STATUS_RUN: &str = "run";
/// Status value that excludes a subshot from compilation.
pub const STATUS_OMIT: &str = "omit";
/// Status value that removes the status line entirely.
pub const STATUS_NOT_STARTED: &str = "not_started";

static TRUTHY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(1|yes|true|on)\s*$").expect("valid regex"));

/// Whether a field value reads as "on".
pub fn is_truthy(value: &str) -> bool {
    TRUTHY_RE.is_match(value)
}

/// Why a subshot is excluded for a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Omitted,
}

/// Check the merged field map for `DISABLED` or an `omit` status.
pub fn is_skippable(fields: &FieldMap, family: JobFamily) -> Option<SkipReason> {
    if fields.get(DISABLED_KEY).is_some_and(|v| is_truthy(v)) {
        return Some(SkipReason::Disabled);
    }
    let omitted = fields
        .get(&family.status_key())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(STATUS_OMIT));
    omitted.then_some(SkipReason::Omitted)
}

/// Blocks an edit applies to. `subshot: None` targets every subshot of the shot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotSelector {
    pub sequence: String,
    pub shot: String,
    pub subshot: Option<String>,
}

impl ShotSelector {
    pub fn shot(sequence: impl Into<String>, shot: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            shot: shot.into(),
            subshot: None,
        }
    }

    pub fn subshot(
        sequence: impl Into<String>,
        shot: impl Into<String>,
        subshot: impl Into<String>,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            shot: shot.into(),
            subshot: Some(subshot.into()),
        }
    }

    fn matches(&self, block: &ShotBlock) -> bool {
        block.sequence == self.sequence
            && block.shot == self.shot
            && self.subshot.as_deref().is_none_or(|name| name == block.name)
    }
}

// ---------------------------------------------------------------------------
// Field edits
// ---------------------------------------------------------------------------

/// Record that `family` ran for the selected blocks.
pub fn mark_run(
    lines: &mut Vec<String>,
    selector: &ShotSelector,
    family: JobFamily,
) -> Result<(), CoreError> {
    set_status(lines, selector, family, STATUS_RUN)
}

/// Set `STATUS_{KEY}` to `value`; [`STATUS_NOT_STARTED`] removes the line.
pub fn set_status(
    lines: &mut Vec<String>,
    selector: &ShotSelector,
    family: JobFamily,
    value: &str,
) -> Result<(), CoreError> {
    let value = value.trim();
    if value.is_empty() || value.contains('\n') {
        return Err(CoreError::Validation(format!(
            "Invalid status value '{value}'"
        )));
    }
    let value = (value != STATUS_NOT_STARTED).then_some(value);
    set_field(lines, selector, &family.status_key(), value)
}

pub fn set_disabled(lines: &mut Vec<String>, selector: &ShotSelector) -> Result<(), CoreError> {
    set_field(lines, selector, DISABLED_KEY, Some("1"))
}

pub fn set_enabled(lines: &mut Vec<String>, selector: &ShotSelector) -> Result<(), CoreError> {
    set_field(lines, selector, DISABLED_KEY, None)
}

/// Set or remove a single-line field in every selected block.
///
/// An existing `KEY=` line is replaced in place (duplicates are removed).
/// If it opened a multi-line value, the continuation lines go with it.
/// A missing one is inserted after the block's last non-blank line.
pub fn set_field(
    lines: &mut Vec<String>,
    selector: &ShotSelector,
    key: &str,
    value: Option<&str>,
) -> Result<(), CoreError> {
    let mut targets: Vec<ShotRange> = scan_blocks(lines)
        .into_iter()
        .filter(|b| selector.matches(b))
        .map(|b| b.range)
        .collect();
    if targets.is_empty() {
        return Err(CoreError::ShotNotFound {
            sequence: selector.sequence.clone(),
            shot: selector.shot.clone(),
        });
    }
    targets.sort_by(|a, b| b.start.cmp(&a.start));

    for range in targets {
        edit_block(lines, range, key, value);
    }
    tracing::debug!(
        sequence = %selector.sequence,
        shot = %selector.shot,
        key,
        value = value.unwrap_or("<removed>"),
        "Edited config field"
    );
    Ok(())
}

fn defines_key(line: &str, key: &str) -> bool {
    line.trim_start()
        .split_once('=')
        .is_some_and(|(k, _)| k.trim() == key)
}

/// Lines held by the field defined at `index`. An empty value owns the
/// continuation lines up to the next `KEY=` line, minus trailing blanks
/// and comments.
fn field_span(lines: &[String], index: usize, end: usize) -> Range<usize> {
    let opens_continuation = lines[index]
        .split_once('=')
        .is_some_and(|(_, value)| value.trim().is_empty());
    if !opens_continuation {
        return index..index + 1;
    }
    let is_content = |i: &usize| {
        let line = lines[*i].trim();
        !line.is_empty() && !line.starts_with('#')
    };
    let closes = |i: &usize| {
        is_content(i) && (lines[*i].contains('=') || lines[*i].trim() == SECTION_DELIMITER)
    };
    let stop = (index + 1..end).find(closes).unwrap_or(end);
    let last = (index + 1..stop).rev().find(is_content).unwrap_or(index);
    index..last + 1
}

fn edit_block(lines: &mut Vec<String>, range: ShotRange, key: &str, value: Option<&str>) {
    let body = range.start + 1..range.end;
    let spans: Vec<Range<usize>> = body
        .clone()
        .filter(|&i| defines_key(&lines[i], key))
        .map(|i| field_span(lines, i, range.end))
        .collect();

    match (value, spans.split_first()) {
        (Some(value), Some((first, duplicates))) => {
            for span in duplicates.iter().rev() {
                lines.drain(span.clone());
            }
            let ending = line_ending(&lines[first.start]);
            lines[first.start] = format!("{key}={value}{ending}");
            lines.drain(first.start + 1..first.end);
        }
        (Some(value), None) => {
            let anchor = body
                .rev()
                .find(|&i| !lines[i].trim().is_empty())
                .unwrap_or(range.start);
            insert_line(lines, anchor + 1, format!("{key}={value}\n"));
        }
        (None, _) => {
            for span in spans.iter().rev() {
                lines.drain(span.clone());
            }
        }
    }
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Insert `line` at `index`, terminating the previous line first if it
/// was the unterminated last line of the file.
fn insert_line(lines: &mut Vec<String>, index: usize, line: String) {
    if let Some(prev) = index.checked_sub(1).and_then(|i| lines.get_mut(i)) {
        if !prev.ends_with('\n') {
            prev.push('\n');
        }
    }
    lines.insert(index, line);
}

// ---------------------------------------------------------------------------
// Block edits
// ---------------------------------------------------------------------------

/// Text of the global block (everything before the first delimiter).
pub fn globals_text<S: AsRef<str>>(lines: &[S]) -> String {
    let head: Vec<&str> = lines[..globals_end(lines)]
        .iter()
        .map(|l| l.as_ref())
        .collect();
    head.concat()
}

/// Replace the lines of `range` with `text`.
pub fn replace_block(lines: &mut Vec<String>, range: ShotRange, text: &str) -> Result<(), CoreError> {
    if range.start > range.end || range.end > lines.len() {
        return Err(CoreError::Validation(format!(
            "Range {}..{} is outside the config ({} lines)",
            range.start,
            range.end,
            lines.len()
        )));
    }
    let mut replacement = split_lines(text);
    if range.end < lines.len() {
        if let Some(last) = replacement.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
    }
    lines.splice(range.start..range.end, replacement);
    Ok(())
}

/// Apply several block replacements in one pass.
///
/// Ranges are applied from the bottom of the file up so that each
/// range still refers to the original line numbers.
pub fn replace_blocks(
    lines: &mut Vec<String>,
    mut edits: Vec<(ShotRange, String)>,
) -> Result<(), CoreError> {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for pair in edits.windows(2) {
        if pair[1].0.end > pair[0].0.start {
            return Err(CoreError::Validation(format!(
                "Ranges {}..{} and {}..{} overlap",
                pair[1].0.start, pair[1].0.end, pair[0].0.start, pair[0].0.end
            )));
        }
    }
    for (range, text) in edits {
        replace_block(lines, range, &text)?;
    }
    Ok(())
}

/// Insert a new shot block after the last block of `sequence`, or at the
/// end of the file when the sequence has no blocks yet. A missing
/// leading delimiter is added.
pub fn append_shot(lines: &mut Vec<String>, sequence: &str, block: &str) -> ShotRange {
    let mut new_lines = split_lines(block);
    let starts_with_delimiter = new_lines
        .first()
        .is_some_and(|l| l.trim() == SECTION_DELIMITER);
    if !starts_with_delimiter {
        new_lines.insert(0, format!("{SECTION_DELIMITER}\n"));
    }
    if let Some(last) = new_lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }

    let at = scan_blocks(lines)
        .into_iter()
        .filter(|b| b.sequence == sequence)
        .map(|b| b.range.end)
        .max()
        .unwrap_or(lines.len());

    if let Some(prev) = at.checked_sub(1).and_then(|i| lines.get_mut(i)) {
        if !prev.ends_with('\n') {
            prev.push('\n');
        }
    }
    let range = ShotRange {
        start: at,
        end: at + new_lines.len(),
    };
    lines.splice(at..at, new_lines);
    range
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config_parser::{parse, SYNOPSIS_KEY};
    use crate::shot_range::scan_ranges;

    const SAMPLE: &str = "\
PROJECT=Demo
!---------
SEQUENCE=s1
SHOT=0001
NAME=heroA
POSITIVE_PROMPT=a castle

!---------
SEQUENCE=s1
SHOT=0001
NAME=heroB
!---------
SEQUENCE=s2
SHOT=0002
STATUS_CTFLUXT2I=failed";

    fn edited(edit: impl FnOnce(&mut Vec<String>)) -> String {
        let mut lines = split_lines(SAMPLE);
        edit(&mut lines);
        lines.concat()
    }

    #[test]
    fn mark_run_inserts_after_last_non_blank_line() {
        let text = edited(|lines| {
            mark_run(lines, &ShotSelector::subshot("s1", "0001", "heroA"), JobFamily::FluxT2i).unwrap()
        });
        assert!(text.contains("POSITIVE_PROMPT=a castle\nSTATUS_CTFLUXT2I=run\n\n!---------"));
    }

    #[test]
    fn mark_run_replaces_existing_status_and_terminates_last_line() {
        let text = edited(|lines| {
            mark_run(lines, &ShotSelector::shot("s2", "0002"), JobFamily::FluxT2i).unwrap()
        });
        assert!(text.ends_with("SHOT=0002\nSTATUS_CTFLUXT2I=run\n"));
        assert!(!text.contains("failed"));
    }

    #[test]
    fn shot_selector_touches_every_subshot() {
        let text = edited(|lines| set_disabled(lines, &ShotSelector::shot("s1", "0001")).unwrap());
        let model = parse(&text);
        for name in ["heroA", "heroB"] {
            let fields = model.subshot("Demo", "s1", "0001", name).unwrap();
            assert_eq!(fields[DISABLED_KEY], "1");
        }
        assert!(model.subshot("Demo", "s2", "0002", "unnamed").unwrap().get(DISABLED_KEY).is_none());
    }

    #[test]
    fn edits_change_only_the_edited_field() {
        let before = parse(SAMPLE);
        let text = edited(|lines| {
            set_status(
                lines,
                &ShotSelector::subshot("s1", "0001", "heroB"),
                JobFamily::Wan25s,
                STATUS_OMIT,
            )
            .unwrap()
        });
        let after = parse(&text);

        let mut expected = before.subshot("Demo", "s1", "0001", "heroB").unwrap().clone();
        expected.insert("STATUS_CTWAN25S".into(), "omit".into());
        assert_eq!(after.subshot("Demo", "s1", "0001", "heroB"), Some(&expected));
        assert_eq!(
            after.subshot("Demo", "s1", "0001", "heroA"),
            before.subshot("Demo", "s1", "0001", "heroA")
        );
        assert_eq!(after.globals, before.globals);
    }

    const MULTILINE: &str = "\
PROJECT=Demo
!---------
SEQUENCE=s1
SHOT=0001
NAME=heroA
POSITIVE_PROMPT=
a castle

at night
# lit by torches
NEGATIVE_PROMPT=blurry
!---------
SEQUENCE=s1
SHOT=0002
POSITIVE_PROMPT=
a field
";

    #[test]
    fn replacing_multiline_value_drops_its_continuation() {
        let mut lines = split_lines(MULTILINE);
        set_field(&mut lines, &ShotSelector::shot("s1", "0001"), "POSITIVE_PROMPT", Some("a tower")).unwrap();
        let text = lines.concat();
        assert!(text.contains("NAME=heroA\nPOSITIVE_PROMPT=a tower\n# lit by torches\nNEGATIVE_PROMPT=blurry\n"));

        let model = parse(&text);
        let fields = model.subshot("Demo", "s1", "0001", "heroA").unwrap();
        assert_eq!(fields["POSITIVE_PROMPT"], "a tower");
        assert_eq!(fields["NEGATIVE_PROMPT"], "blurry");
        assert!(fields.get(SYNOPSIS_KEY).is_none());
        assert_eq!(
            model.subshot("Demo", "s1", "0002", "unnamed").unwrap()["POSITIVE_PROMPT"],
            "a field"
        );
    }

    #[test]
    fn removing_multiline_value_at_end_of_file() {
        let mut lines = split_lines(MULTILINE);
        set_field(&mut lines, &ShotSelector::shot("s1", "0002"), "POSITIVE_PROMPT", None).unwrap();
        let text = lines.concat();
        assert!(text.ends_with("SHOT=0002\n"));
        let model = parse(&text);
        let fields = model.subshot("Demo", "s1", "0002", "unnamed").unwrap();
        assert!(fields.get("POSITIVE_PROMPT").is_none());
        assert!(fields.get(SYNOPSIS_KEY).is_none());
    }

    #[test]
    fn not_started_removes_status_line() {
        let text = edited(|lines| {
            set_status(lines, &ShotSelector::shot("s2", "0002"), JobFamily::FluxT2i, STATUS_NOT_STARTED)
                .unwrap()
        });
        assert!(!text.contains("STATUS_CTFLUXT2I"));
    }

    #[test]
    fn enable_removes_disabled_line() {
        let mut lines = split_lines(SAMPLE);
        let selector = ShotSelector::shot("s2", "0002");
        set_disabled(&mut lines, &selector).unwrap();
        set_enabled(&mut lines, &selector).unwrap();
        assert_eq!(lines.concat(), format!("{SAMPLE}\n"));
    }

    #[test]
    fn unknown_shot_is_reported() {
        let mut lines = split_lines(SAMPLE);
        let result = mark_run(&mut lines, &ShotSelector::shot("s9", "9999"), JobFamily::FluxT2i);
        assert_matches!(result, Err(CoreError::ShotNotFound { .. }));
    }

    #[test]
    fn multi_line_status_is_rejected() {
        let mut lines = split_lines(SAMPLE);
        let result = set_status(&mut lines, &ShotSelector::shot("s2", "0002"), JobFamily::FluxT2i, "a\nb");
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    // ---------------------------------------------------------------------------
    // Skip checks
    // ---------------------------------------------------------------------------

    #[test]
    fn truthy_values() {
        for v in ["1", "yes", "TRUE", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "no", "", "enabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn skippable_by_disabled_or_omit() {
        let mut fields = FieldMap::new();
        assert_eq!(is_skippable(&fields, JobFamily::FluxT2i), None);
        fields.insert("STATUS_CTFLUXT2I".into(), "OMIT".into());
        assert_eq!(is_skippable(&fields, JobFamily::FluxT2i), Some(SkipReason::Omitted));
        assert_eq!(is_skippable(&fields, JobFamily::Wan25s), None);
        fields.insert(DISABLED_KEY.into(), "yes".into());
        assert_eq!(is_skippable(&fields, JobFamily::Wan25s), Some(SkipReason::Disabled));
    }

    // ---------------------------------------------------------------------------
    // Block edits
    // ---------------------------------------------------------------------------

    #[test]
    fn globals_text_stops_at_first_delimiter() {
        assert_eq!(globals_text(&split_lines(SAMPLE)), "PROJECT=Demo\n");
    }

    #[test]
    fn replace_block_round_trips_through_parser() {
        let mut lines = split_lines(SAMPLE);
        let range = scan_ranges(&lines)[&("s2".to_string(), "0002".to_string())];
        let new_block = "!---------\nSEQUENCE=s2\nSHOT=0002\nWIDTH=640";
        replace_block(&mut lines, range, new_block).unwrap();
        let model = parse(&lines.concat());
        let fields = model.subshot("Demo", "s2", "0002", "unnamed").unwrap();
        assert_eq!(fields["WIDTH"], "640");
        assert!(fields.get("STATUS_CTFLUXT2I").is_none());
    }

    #[test]
    fn replace_blocks_applies_bottom_up() {
        let mut lines = split_lines(SAMPLE);
        let ranges = scan_ranges(&lines);
        let first = ranges[&("s1".to_string(), "0001".to_string())];
        let second = ranges[&("s2".to_string(), "0002".to_string())];
        replace_blocks(
            &mut lines,
            vec![
                (first, "!---------\nSEQUENCE=s1\nSHOT=0001\nNAME=only\n".into()),
                (second, "!---------\nSEQUENCE=s2\nSHOT=0002\nNAME=renamed\n".into()),
            ],
        )
        .unwrap();
        let model = parse(&lines.concat());
        let seqs = model.sequences("Demo").unwrap();
        assert_eq!(seqs["s1"]["0001"].keys().collect::<Vec<_>>(), ["only"]);
        assert_eq!(seqs["s2"]["0002"].keys().collect::<Vec<_>>(), ["renamed"]);
    }

    #[test]
    fn overlapping_replacements_are_rejected() {
        let mut lines = split_lines(SAMPLE);
        let result = replace_blocks(
            &mut lines,
            vec![
                (ShotRange { start: 1, end: 8 }, String::new()),
                (ShotRange { start: 5, end: 10 }, String::new()),
            ],
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn append_shot_goes_after_sequence_or_at_end() {
        let mut lines = split_lines(SAMPLE);
        let range = append_shot(&mut lines, "s1", "SEQUENCE=s1\nSHOT=0003\n");
        assert_eq!(lines[range.start], format!("{SECTION_DELIMITER}\n"));
        let ranges = scan_ranges(&lines);
        assert_eq!(ranges[&("s1".to_string(), "0003".to_string())], range);
        assert!(range.end <= ranges[&("s2".to_string(), "0002".to_string())].start);

        let range = append_shot(&mut lines, "s7", "!---------\nSEQUENCE=s7\nSHOT=1");
        assert_eq!(range.end, lines.len());
        assert!(parse(&lines.concat()).subshot("Demo", "s7", "1", "unnamed").is_some());
    }
}
