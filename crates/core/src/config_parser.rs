//! Line-oriented shot config parser.
//!
//! Grammar summary:
//!
//! - `KEY=value` stores a field. An empty value opens a multi-line
//!   continuation that runs until the next `KEY=` line, a delimiter, or
//!   end of file.
//! - `#` lines are comments and are dropped everywhere.
//! - [`SECTION_DELIMITER`] separates the global block from each shot block.
//! - Free text outside a continuation accumulates into `SYNOPSIS`.
//!
//! Malformed lines never fail the parse. With [`ParseOptions::strict`]
//! they are reported as [`ParseWarning`]s instead of being dropped
//! silently.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::CoreError;
use crate::host_router::normalize_host;
use crate::job_family::HostGroup;
use crate::types::FieldMap;

/// Line that closes the current block and opens a shot block.
pub const SECTION_DELIMITER: &str = "!---------";

/// Synthetic field collecting free-text lines.
pub const SYNOPSIS_KEY: &str = "SYNOPSIS";

pub const DEFAULT_PROJECT: &str = "default";
pub const UNKNOWN_ID: &str = "unknown";
pub const UNNAMED_SUBSHOT: &str = "unnamed";

/// Fallback worker used when a family has no pool of its own.
pub const DEFAULT_FALLBACK_HOST: &str = "127.0.0.1:8188";

/// Field names used to place a shot block in the hierarchy.
pub const SEQUENCE_KEY: &str = "SEQUENCE";
pub const SEQUENCE_ALIAS_KEY: &str = "SEQ";
pub const SHOT_KEY: &str = "SHOT";
pub const NAME_KEY: &str = "NAME";

pub type Subshots = BTreeMap<String, FieldMap>;
pub type Shots = BTreeMap<String, Subshots>;
pub type Sequences = BTreeMap<String, Shots>;

/// Parsed config: globals plus `project -> sequence -> shot -> subshot`.
///
/// Each subshot map is a snapshot of the globals merged with the shot
/// block's own fields (shot fields win).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigModel {
    pub globals: FieldMap,
    /// Split host lists keyed by `{FAMILY}_HOSTS`, already normalized to URLs.
    pub host_lists: BTreeMap<String, Vec<String>>,
    /// Normalized fallback worker URL.
    pub fallback_host: String,
    pub projects: BTreeMap<String, Sequences>,
}

impl ConfigModel {
    /// Project named by the globals, or [`DEFAULT_PROJECT`].
    pub fn project_name(&self) -> &str {
        self.globals
            .get("PROJECT")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROJECT)
    }

    pub fn global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(String::as_str)
    }

    pub fn hosts(&self, group: HostGroup) -> &[String] {
        self.host_lists
            .get(group.hosts_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sequences(&self, project: &str) -> Option<&Sequences> {
        self.projects.get(project)
    }

    pub fn subshot(&self, project: &str, sequence: &str, shot: &str, name: &str) -> Option<&FieldMap> {
        self.projects.get(project)?.get(sequence)?.get(shot)?.get(name)
    }

    /// Iterate every subshot of every project in key order.
    pub fn iter_subshots(&self) -> impl Iterator<Item = (&str, &str, &str, &str, &FieldMap)> {
        self.projects.iter().flat_map(|(project, sequences)| {
            sequences.iter().flat_map(move |(sequence, shots)| {
                shots.iter().flat_map(move |(shot, subshots)| {
                    subshots.iter().map(move |(name, fields)| {
                        (
                            project.as_str(),
                            sequence.as_str(),
                            shot.as_str(),
                            name.as_str(),
                            fields,
                        )
                    })
                })
            })
        })
    }
}

/// Parser knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Report malformed input as warnings instead of dropping it silently.
    pub strict: bool,
}

/// Problems found in the config text. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// `=value` with nothing before the `=`; the line was dropped.
    EmptyKey { line: usize },
    /// A key set twice within one block; the later value wins.
    DuplicateField { line: usize, key: String },
    /// A shot block without `SEQUENCE` or `SHOT`; placed under `unknown`.
    MissingIdentifier { line: usize, field: &'static str },
    /// Two blocks resolve to the same subshot; the later one wins.
    DuplicateSubshot {
        line: usize,
        sequence: String,
        shot: String,
        name: String,
    },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::EmptyKey { line } => write!(f, "line {line}: empty key, line dropped"),
            ParseWarning::DuplicateField { line, key } => {
                write!(f, "line {line}: field {key} set twice in one block")
            }
            ParseWarning::MissingIdentifier { line, field } => {
                write!(f, "block at line {line}: missing {field}, using '{UNKNOWN_ID}'")
            }
            ParseWarning::DuplicateSubshot {
                line,
                sequence,
                shot,
                name,
            } => write!(
                f,
                "block at line {line}: {sequence}/{shot}/{name} redefines an earlier block"
            ),
        }
    }
}

/// Model plus any warnings collected under strict mode.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub model: ConfigModel,
    pub warnings: Vec<ParseWarning>,
}

impl ParseOutcome {
    /// Fail if any warnings were collected.
    pub fn into_clean(self) -> Result<ConfigModel, CoreError> {
        if self.warnings.is_empty() {
            Ok(self.model)
        } else {
            Err(CoreError::StrictParse(self.warnings.len()))
        }
    }
}

/// Parse config text leniently.
pub fn parse(text: &str) -> ConfigModel {
    parse_with(text, ParseOptions::default()).model
}

/// Read and parse a config file leniently.
pub fn parse_file(path: &Path) -> Result<ConfigModel, CoreError> {
    parse_file_with(path, ParseOptions::default()).map(|outcome| outcome.model)
}

pub fn parse_file_with(path: &Path, options: ParseOptions) -> Result<ParseOutcome, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| CoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_with(&text, options))
}

/// Parse config text with explicit options.
pub fn parse_with(text: &str, options: ParseOptions) -> ParseOutcome {
    let mut state = ParserState::default();
    for (index, line) in text.lines().enumerate() {
        state.feed(index + 1, line);
    }
    state.finish();

    let ParserState {
        globals,
        blocks,
        mut warnings,
        ..
    } = state;

    let model = build_model(globals, blocks, &mut warnings);
    if !options.strict {
        warnings.clear();
    }
    ParseOutcome { model, warnings }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Section {
    #[default]
    Globals,
    Shot,
}

#[derive(Debug, Default)]
struct RawBlock {
    start_line: usize,
    fields: FieldMap,
}

#[derive(Debug, Default)]
struct ParserState {
    section: Section,
    globals: FieldMap,
    current: RawBlock,
    open_key: Option<(String, usize)>,
    accumulated: String,
    blocks: Vec<RawBlock>,
    warnings: Vec<ParseWarning>,
}

impl ParserState {
    fn feed(&mut self, line_no: usize, line: &str) {
        let stripped = line.trim();

        if stripped.is_empty() {
            if self.open_key.is_some() {
                self.accumulated.push('\n');
            }
            return;
        }
        if stripped.starts_with('#') {
            return;
        }
        if stripped == SECTION_DELIMITER {
            self.close_key();
            self.close_block();
            self.current.start_line = line_no;
            self.section = Section::Shot;
            return;
        }

        if let Some((key, value)) = stripped.split_once('=') {
            self.close_key();
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                self.warnings.push(ParseWarning::EmptyKey { line: line_no });
                return;
            }
            if value.is_empty() {
                self.open_key = Some((key.to_string(), line_no));
                self.accumulated.clear();
            } else {
                self.store(line_no, key.to_string(), value.to_string());
            }
        } else if self.open_key.is_some() {
            self.accumulated.push('\n');
            self.accumulated.push_str(line.trim_end());
        } else {
            let target = self.target();
            match target.get_mut(SYNOPSIS_KEY) {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(stripped);
                }
                None => {
                    target.insert(SYNOPSIS_KEY.to_string(), stripped.to_string());
                }
            }
        }
    }

    fn finish(&mut self) {
        self.close_key();
        self.close_block();
    }

    fn target(&mut self) -> &mut FieldMap {
        match self.section {
            Section::Globals => &mut self.globals,
            Section::Shot => &mut self.current.fields,
        }
    }

    fn store(&mut self, line_no: usize, key: String, value: String) {
        let target = self.target();
        let duplicate = target.insert(key.clone(), value).is_some();
        if duplicate {
            self.warnings
                .push(ParseWarning::DuplicateField { line: line_no, key });
        }
    }

    fn close_key(&mut self) {
        if let Some((key, line_no)) = self.open_key.take() {
            let value = std::mem::take(&mut self.accumulated).trim().to_string();
            self.store(line_no, key, value);
        }
    }

    fn close_block(&mut self) {
        if self.section == Section::Shot && !self.current.fields.is_empty() {
            self.blocks.push(std::mem::take(&mut self.current));
        }
    }
}

/// Fields of a single shot block, parsed exactly as the full parser
/// would. `lines` should exclude the opening delimiter.
pub(crate) fn parse_block_fields<'a>(lines: impl IntoIterator<Item = &'a str>) -> FieldMap {
    let mut state = ParserState {
        section: Section::Shot,
        ..ParserState::default()
    };
    for (index, line) in lines.into_iter().enumerate() {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim() == SECTION_DELIMITER {
            break;
        }
        state.feed(index + 1, line);
    }
    state.close_key();
    std::mem::take(&mut state.current.fields)
}

// ---------------------------------------------------------------------------
// Merge into the hierarchy
// ---------------------------------------------------------------------------

/// Resolve a block's sequence id: `SEQUENCE`, then the `SEQ` alias.
pub fn block_sequence(fields: &FieldMap) -> Option<&str> {
    fields
        .get(SEQUENCE_KEY)
        .or_else(|| fields.get(SEQUENCE_ALIAS_KEY))
        .map(String::as_str)
}

fn build_model(
    globals: FieldMap,
    blocks: Vec<RawBlock>,
    warnings: &mut Vec<ParseWarning>,
) -> ConfigModel {
    let host_lists = derive_host_lists(&globals);
    let fallback_host = normalize_host(
        globals
            .get("FALLBACK_HOST")
            .or_else(|| globals.get("HOST"))
            .map(String::as_str)
            .unwrap_or(DEFAULT_FALLBACK_HOST),
    );

    let mut model = ConfigModel {
        globals,
        host_lists,
        fallback_host,
        projects: BTreeMap::new(),
    };
    let project = model.project_name().to_string();
    let mut sequences = Sequences::new();

    for block in blocks {
        let sequence = match block_sequence(&block.fields) {
            Some(seq) => seq.to_string(),
            None => {
                warnings.push(ParseWarning::MissingIdentifier {
                    line: block.start_line,
                    field: SEQUENCE_KEY,
                });
                UNKNOWN_ID.to_string()
            }
        };
        let shot = match block.fields.get(SHOT_KEY) {
            Some(shot) => shot.clone(),
            None => {
                warnings.push(ParseWarning::MissingIdentifier {
                    line: block.start_line,
                    field: SHOT_KEY,
                });
                UNKNOWN_ID.to_string()
            }
        };
        let name = block
            .fields
            .get(NAME_KEY)
            .cloned()
            .unwrap_or_else(|| UNNAMED_SUBSHOT.to_string());

        let mut merged = model.globals.clone();
        merged.extend(block.fields);

        let subshots = sequences
            .entry(sequence.clone())
            .or_default()
            .entry(shot.clone())
            .or_default();
        if subshots.insert(name.clone(), merged).is_some() {
            warnings.push(ParseWarning::DuplicateSubshot {
                line: block.start_line,
                sequence,
                shot,
                name,
            });
        }
    }

    model.projects.insert(project, sequences);
    model
}

/// Split comma-separated host fields into normalized URL lists.
///
/// A literal `{FAMILY}_HOSTS` global takes precedence over `{FAMILY}_HOST`.
fn derive_host_lists(globals: &FieldMap) -> BTreeMap<String, Vec<String>> {
    let mut lists = BTreeMap::new();
    for group in HostGroup::ALL {
        let raw = globals
            .get(group.hosts_key())
            .or_else(|| globals.get(group.host_key()));
        let Some(raw) = raw else { continue };
        let hosts: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(normalize_host)
            .collect();
        lists.insert(group.hosts_key().to_string(), hosts);
    }
    lists
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
