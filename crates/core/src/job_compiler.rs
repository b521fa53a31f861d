//! Expand the parsed model into ordered job descriptors.
//!
//! Compilation is a pure pass: same model and filter in, same ordered
//! list out. Order is family tag, then sequence, shot and subshot, each
//! lexicographic.

use std::path::PathBuf;

use serde::Serialize;

use crate::annotation::{is_skippable, ShotSelector};
use crate::camera_mode::CameraMode;
use crate::config_parser::ConfigModel;
use crate::error::CoreError;
use crate::job_family::JobFamily;
use crate::types::FieldMap;

pub const DEFAULT_DIMENSION: u32 = 1024;

/// Fields that list the families a subshot opts into. The first one
/// present wins.
pub const JOBTYPE_KEYS: [&str; 3] = ["JOBTYPE", "IMAGE_JOBTYPE", "VIDEO_JOBTYPE"];

const SEED_MODULUS: i128 = 1 << 32;

/// A prior-stage frame a descriptor consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFrame {
    /// Frame digits exactly as they appear in the file name.
    pub number: String,
    pub file_name: String,
    pub path: PathBuf,
}

impl InputFrame {
    pub fn value(&self) -> u64 {
        self.number.parse().unwrap_or(0)
    }
}

/// One submission unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    pub project: String,
    pub sequence: String,
    pub shot: String,
    pub subshot: String,
    pub family: JobFamily,
    /// Merged global and shot fields.
    pub fields: FieldMap,
    pub width: u32,
    pub height: u32,
    pub iterations: u32,
    pub seed: u32,
    /// Composed prompt, escaped for embedding inside a JSON string literal.
    pub prompt: String,
    pub input_frame: Option<InputFrame>,
}

impl JobDescriptor {
    /// Seed for iteration `i` of this descriptor.
    pub fn iteration_seed(&self, i: u32) -> u32 {
        self.seed.wrapping_add(i)
    }

    /// The composed prompt with JSON escaping undone.
    pub fn prompt_text(&self) -> String {
        serde_json::from_str::<String>(&format!("\"{}\"", self.prompt))
            .unwrap_or_else(|_| self.prompt.clone())
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Human-readable identity used in logs and results.
    pub fn key(&self) -> String {
        let mut key = format!(
            "{}:{}/{}/{}/{}",
            self.family, self.project, self.sequence, self.shot, self.subshot
        );
        if let Some(frame) = &self.input_frame {
            key.push('#');
            key.push_str(&frame.number);
        }
        key
    }

    /// Prefix assigned to every output-saving node of the workflow.
    pub fn output_prefix(&self) -> String {
        let base = format!(
            "{}/{}/{}/{}",
            self.project, self.sequence, self.shot, self.subshot
        );
        match (&self.input_frame, self.family.frame_output()) {
            (Some(frame), Some(pattern)) => {
                format!("{base}__{}__{}", frame.number, pattern.infix)
            }
            _ => format!("{base}_"),
        }
    }

    pub fn selector(&self) -> ShotSelector {
        ShotSelector::subshot(&self.sequence, &self.shot, &self.subshot)
    }
}

/// Optional restrictions on what gets compiled. `None` means no restriction.
#[derive(Debug, Clone, Default)]
pub struct CompileFilter {
    pub families: Option<Vec<JobFamily>>,
    pub project: Option<String>,
    pub sequence: Option<String>,
    pub shot: Option<String>,
}

impl CompileFilter {
    fn allows(&self, family: JobFamily) -> bool {
        self.families.as_ref().is_none_or(|f| f.contains(&family))
    }
}

/// Compile every opted-in subshot into descriptors.
///
/// A missing target project is an error. A missing target sequence or
/// shot simply contributes no jobs.
pub fn compile_jobs(model: &ConfigModel, filter: &CompileFilter) -> Result<Vec<JobDescriptor>, CoreError> {
    let project = filter
        .project
        .as_deref()
        .unwrap_or_else(|| model.project_name());
    let sequences = model
        .sequences(project)
        .ok_or_else(|| CoreError::UnknownProject(project.to_string()))?;
    let seed_start = seed_start(model);

    let mut jobs = Vec::new();
    for family in JobFamily::ALL {
        if !filter.allows(family) {
            continue;
        }
        for (sequence, shots) in sequences {
            if filter.sequence.as_ref().is_some_and(|s| s != sequence) {
                continue;
            }
            for (shot, subshots) in shots {
                if filter.shot.as_ref().is_some_and(|s| s != shot) {
                    continue;
                }
                for (subshot, fields) in subshots {
                    if !opts_in(fields, family) {
                        continue;
                    }
                    if let Some(reason) = is_skippable(fields, family) {
                        tracing::debug!(
                            family = %family,
                            sequence = %sequence,
                            shot = %shot,
                            subshot = %subshot,
                            ?reason,
                            "Skipping subshot"
                        );
                        continue;
                    }

                    let index = jobs.len() as i128;
                    let seed = (seed_start + index).rem_euclid(SEED_MODULUS) as u32;
                    let prompt = if family.composes_prompt() {
                        escape_json_fragment(&compose_prompt(fields, model))
                    } else {
                        String::new()
                    };
                    jobs.push(JobDescriptor {
                        project: project.to_string(),
                        sequence: sequence.clone(),
                        shot: shot.clone(),
                        subshot: subshot.clone(),
                        family,
                        fields: fields.clone(),
                        width: numeric_field(fields, "WIDTH", DEFAULT_DIMENSION),
                        height: numeric_field(fields, "HEIGHT", DEFAULT_DIMENSION),
                        iterations: iteration_count(family, fields),
                        seed,
                        prompt,
                        input_frame: None,
                    });
                }
            }
        }
    }

    tracing::info!(project, jobs = jobs.len(), "Compiled jobs");
    Ok(jobs)
}

/// `SEED_START` as a signed value; unparsable input counts as 0.
fn seed_start(model: &ConfigModel) -> i128 {
    match model.global("SEED_START").map(str::trim) {
        None | Some("") => 0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = "SEED_START", value = raw, "Unparsable seed start, using 0");
            0
        }),
    }
}

/// Submissions per descriptor, at least 1.
///
/// The camera transform family submits one prompt per view of its mode;
/// `GENERATE_QWEN_ANGLES`, when set, caps that view count.
fn iteration_count(family: JobFamily, fields: &FieldMap) -> u32 {
    if family == JobFamily::QwenCameraTransform {
        let views = match CameraMode::from_fields(fields) {
            Ok(mode) => u32::try_from(mode.view_count()).unwrap_or(u32::MAX),
            // The adapter rejects the job; keep the count minimal.
            Err(_) => 1,
        };
        let cap = family
            .iteration_field()
            .map_or(views, |key| numeric_field(fields, key, views));
        return views.min(cap).max(1);
    }
    family
        .iteration_field()
        .map(|key| numeric_field(fields, key, 1).max(1))
        .unwrap_or(1)
}

/// Families listed by the subshot's job type field.
pub fn listed_families(fields: &FieldMap) -> Vec<&str> {
    JOBTYPE_KEYS
        .iter()
        .find_map(|key| fields.get(*key).filter(|v| !v.trim().is_empty()))
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn opts_in(fields: &FieldMap, family: JobFamily) -> bool {
    listed_families(fields).contains(&family.tag())
}

/// `POSITIVE_PROMPT`, `ENVIRONMENT_PROMPT` and the global
/// `GRAPHICAL_STYLE`, trimmed and joined with `", "`.
pub fn compose_prompt(fields: &FieldMap, model: &ConfigModel) -> String {
    let parts = [
        fields.get("POSITIVE_PROMPT").map(String::as_str),
        fields.get("ENVIRONMENT_PROMPT").map(String::as_str),
        model.global("GRAPHICAL_STYLE"),
    ];
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape `text` as the inside of a JSON string literal.
pub fn escape_json_fragment(text: &str) -> String {
    let quoted = serde_json::Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn numeric_field(fields: &FieldMap, key: &str, default: u32) -> u32 {
    match fields.get(key).map(|v| v.trim()) {
        None | Some("") => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = raw, default, "Unparsable numeric field, using default");
            default
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config_parser::parse;

    const DEMO: &str = "\
PROJECT=Demo
SEED_START=10
!---------
SEQ=s1
SHOT=0001
NAME=heroA
JOBTYPE=ct_flux_t2i
POSITIVE_PROMPT=a castle
WIDTH=512
HEIGHT=512
";

    const MIXED: &str = "\
PROJECT=Demo
SEED_START=4294967295
GRAPHICAL_STYLE=ink wash
FLUX_ITERATIONS=3
!---------
SEQUENCE=s2
SHOT=0001
NAME=b
JOBTYPE=ct_wan2_5s, ct_flux_t2i
POSITIVE_PROMPT=say \"hi\"
ENVIRONMENT_PROMPT=  night
!---------
SEQUENCE=s1
SHOT=0002
NAME=a
IMAGE_JOBTYPE=ct_qwen_cameratransform,ct_flux_t2i
GENERATE_QWEN_ANGLES=4
!---------
SEQUENCE=s1
SHOT=0003
JOBTYPE=ct_flux_t2i
DISABLED=yes
!---------
SEQUENCE=s1
SHOT=0004
JOBTYPE=ct_flux_t2i
STATUS_CTFLUXT2I=omit
";

    fn keys(jobs: &[JobDescriptor]) -> Vec<String> {
        jobs.iter().map(JobDescriptor::key).collect()
    }

    #[test]
    fn single_shot_compiles_to_one_descriptor() {
        let jobs = compile_jobs(&parse(DEMO), &CompileFilter::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(
            (job.sequence.as_str(), job.shot.as_str(), job.subshot.as_str()),
            ("s1", "0001", "heroA")
        );
        assert_eq!((job.width, job.height, job.seed), (512, 512, 10));
        assert_eq!(job.prompt, "a castle");
        assert_eq!(job.family, JobFamily::FluxT2i);
        assert_eq!(job.iterations, 1);
    }

    #[test]
    fn ordering_is_family_then_sequence_then_shot() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        assert_eq!(
            keys(&jobs),
            [
                "ct_flux_t2i:Demo/s1/0002/a",
                "ct_flux_t2i:Demo/s2/0001/b",
                "ct_qwen_cameratransform:Demo/s1/0002/a",
                "ct_wan2_5s:Demo/s2/0001/b",
            ]
        );
    }

    #[test]
    fn seeds_follow_job_index_modulo_u32() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        let seeds: Vec<u32> = jobs.iter().map(|j| j.seed).collect();
        assert_eq!(seeds, [u32::MAX, 0, 1, 2]);
        assert_eq!(jobs[0].iteration_seed(1), 0);
        assert_eq!(jobs[1].iteration_seed(2), 2);
    }

    #[test]
    fn compilation_is_deterministic() {
        let model = parse(MIXED);
        let first = compile_jobs(&model, &CompileFilter::default()).unwrap();
        let second = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn prompt_is_composed_and_escaped() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        assert_eq!(jobs[1].prompt, r#"say \"hi\", night, ink wash"#);
        assert_eq!(jobs[0].prompt, "ink wash");
        // Camera transform carries no prompt.
        assert_eq!(jobs[2].prompt, "");
    }

    #[test]
    fn iteration_count_depends_on_family() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        let counts: Vec<u32> = jobs.iter().map(|j| j.iterations).collect();
        assert_eq!(counts, [3, 3, 4, 1]);
    }

    #[test]
    fn negative_seed_start_wraps_into_u32_range() {
        let model = parse("SEED_START=-5\n!---------\nSEQUENCE=s\nSHOT=1\nJOBTYPE=ct_flux_t2i\n");
        let jobs = compile_jobs(&model, &CompileFilter::default()).unwrap();
        assert_eq!(jobs[0].seed, 4_294_967_291);

        let model = parse("SEED_START=lots\n!---------\nSEQUENCE=s\nSHOT=1\nJOBTYPE=ct_flux_t2i\n");
        assert_eq!(compile_jobs(&model, &CompileFilter::default()).unwrap()[0].seed, 0);
    }

    fn camera_iterations(fields: &str) -> u32 {
        let text = format!(
            "PROJECT=Demo\n!---------\nSEQUENCE=s1\nSHOT=0001\nNAME=a\nJOBTYPE=ct_qwen_cameratransform\n{fields}"
        );
        compile_jobs(&parse(&text), &CompileFilter::default()).unwrap()[0].iterations
    }

    #[test]
    fn camera_iterations_follow_mode_capped_by_angle_count() {
        assert_eq!(camera_iterations(""), 4);
        assert_eq!(camera_iterations("QWEN_CAMERATRANSFORMATION_MODE=TT\n"), 36);
        assert_eq!(camera_iterations("GENERATE_QWEN_ANGLES=2\n"), 2);
        assert_eq!(
            camera_iterations("QWEN_CAMERATRANSFORMATION_MODE=10angles\nGENERATE_QWEN_ANGLES=50\n"),
            10
        );
        assert_eq!(camera_iterations("QWEN_CAMERATRANSFORMATION_MODE=orbit\n"), 1);
    }

    #[test]
    fn dimensions_default_and_fall_back() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        assert_eq!((jobs[0].width, jobs[0].height), (1024, 1024));

        let model = parse("WIDTH=640\nHEIGHT=oops\n!---------\nSEQUENCE=s\nSHOT=1\nJOBTYPE=ct_qwen_i2i\n");
        let jobs = compile_jobs(&model, &CompileFilter::default()).unwrap();
        assert_eq!((jobs[0].width, jobs[0].height), (640, 1024));
    }

    #[test]
    fn filters_restrict_families_sequences_and_shots() {
        let model = parse(MIXED);
        let filter = CompileFilter {
            families: Some(vec![JobFamily::FluxT2i]),
            sequence: Some("s1".into()),
            ..CompileFilter::default()
        };
        assert_eq!(keys(&compile_jobs(&model, &filter).unwrap()), ["ct_flux_t2i:Demo/s1/0002/a"]);

        let filter = CompileFilter {
            shot: Some("9999".into()),
            ..CompileFilter::default()
        };
        assert!(compile_jobs(&model, &filter).unwrap().is_empty());
    }

    #[test]
    fn unknown_project_is_an_error() {
        let filter = CompileFilter {
            project: Some("Nope".into()),
            ..CompileFilter::default()
        };
        assert_matches!(
            compile_jobs(&parse(DEMO), &filter),
            Err(CoreError::UnknownProject(p)) if p == "Nope"
        );
    }

    #[test]
    fn first_present_jobtype_field_wins() {
        let mut fields = FieldMap::new();
        fields.insert("IMAGE_JOBTYPE".into(), "ct_qwen_i2i".into());
        fields.insert("VIDEO_JOBTYPE".into(), "ct_wan2_5s".into());
        assert_eq!(listed_families(&fields), ["ct_qwen_i2i"]);
        fields.insert("JOBTYPE".into(), " ct_flux_t2i , ,ct_wan2_5s".into());
        assert_eq!(listed_families(&fields), ["ct_flux_t2i", "ct_wan2_5s"]);
    }

    #[test]
    fn output_prefix_uses_subshot_name() {
        let jobs = compile_jobs(&parse(DEMO), &CompileFilter::default()).unwrap();
        assert_eq!(jobs[0].output_prefix(), "Demo/s1/0001/heroA_");
    }

    #[test]
    fn prompt_text_undoes_escaping() {
        let jobs = compile_jobs(&parse(MIXED), &CompileFilter::default()).unwrap();
        assert_eq!(jobs[1].prompt_text(), "say \"hi\", night, ink wash");
    }

    #[test]
    fn escape_handles_control_characters() {
        assert_eq!(escape_json_fragment("a\nb\t\"c\"\\"), r#"a\nb\t\"c\"\\"#);
    }
}
