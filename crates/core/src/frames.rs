//! Frame discovery and skip-if-rendered expansion.
//!
//! Families that consume prior-stage frames (see
//! [`JobFamily::frame_output`]) expand each compiled descriptor into one
//! descriptor per input frame found in the shot's output directory.
//! Frames whose derived output already exists are dropped unless
//! `regenerate` is set.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;
use crate::job_compiler::{InputFrame, JobDescriptor};
use crate::job_family::FrameOutputPattern;

const INPUT_EXTENSIONS: &str = "png|jpg|jpeg|bmp|tiff";

static FRAME_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("valid regex"));

/// `{root}/{project}/{sequence}/{shot}`.
pub fn shot_dir(root: &Path, project: &str, sequence: &str, shot: &str) -> PathBuf {
    root.join(project).join(sequence).join(shot)
}

/// File names in `dir`, sorted. A missing directory yields no entries.
pub fn list_dir(dir: &Path) -> Result<Vec<String>, CoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CoreError::ScanDir {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CoreError::ScanDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Frames named `{name}__{NNNNN}_.{image}` among `files`, in frame order.
pub fn input_frames(dir: &Path, name: &str, files: &[String]) -> Vec<InputFrame> {
    let pattern = format!(
        r"^{}__(\d+)_\.(?i:{INPUT_EXTENSIONS})$",
        regex::escape(name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let mut frames: Vec<InputFrame> = files
        .iter()
        .filter_map(|file| {
            let caps = re.captures(file)?;
            Some(InputFrame {
                number: caps[1].to_string(),
                file_name: file.clone(),
                path: dir.join(file),
            })
        })
        .collect();
    frames.sort_by(|a, b| a.value().cmp(&b.value()).then_with(|| a.file_name.cmp(&b.file_name)));
    frames
}

/// Whether `files` holds a derived output for `frame` of subshot `name`.
///
/// Matches `{name}__{digits}__{infix}*.{ext}` where `digits` is the
/// same frame number, so frame 1 never matches the outputs of frame 10.
pub fn has_output(name: &str, frame: &InputFrame, pattern: &FrameOutputPattern, files: &[String]) -> bool {
    let prefix = format!("{name}__");
    let infix = format!("__{}", pattern.infix);
    files.iter().any(|file| {
        let Some(rest) = file.strip_prefix(&prefix) else {
            return false;
        };
        let Some(digits) = FRAME_DIGITS_RE.captures(rest).map(|c| c[1].to_string()) else {
            return false;
        };
        if digits.parse::<u64>().ok() != Some(frame.value()) {
            return false;
        }
        let after = &rest[digits.len()..];
        if !after.starts_with(&infix) {
            return false;
        }
        Path::new(file)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| pattern.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    })
}

/// Replace frame-family descriptors with one descriptor per pending frame.
///
/// Descriptors of other families pass through untouched. Each frame
/// descriptor's seed is the job seed plus the frame number.
pub fn expand_frame_jobs(
    jobs: Vec<JobDescriptor>,
    output_root: &Path,
    regenerate: bool,
) -> Result<Vec<JobDescriptor>, CoreError> {
    let mut expanded = Vec::with_capacity(jobs.len());
    for job in jobs {
        let Some(pattern) = job.family.frame_output() else {
            expanded.push(job);
            continue;
        };
        let dir = shot_dir(output_root, &job.project, &job.sequence, &job.shot);
        let files = list_dir(&dir)?;
        let frames = input_frames(&dir, &job.subshot, &files);
        if frames.is_empty() {
            tracing::info!(job = %job.key(), dir = %dir.display(), "No input frames found");
            continue;
        }

        for frame in frames {
            if !regenerate && has_output(&job.subshot, &frame, &pattern, &files) {
                tracing::info!(job = %job.key(), frame = %frame.number, "Output exists, skipping frame");
                continue;
            }
            let mut frame_job = job.clone();
            frame_job.seed = job.seed.wrapping_add((frame.value() % (1 << 32)) as u32);
            frame_job.input_frame = Some(frame);
            expanded.push(frame_job);
        }
    }
    Ok(expanded)
}
