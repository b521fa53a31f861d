//! Job family catalogue.
//!
//! A job family is a class of render job with its own base template,
//! node-ID contract, iteration source and host pool. The variant order
//! matches the lexicographic order of the tags so that sorting families
//! sorts by tag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Known job families, keyed by their config tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobFamily {
    /// Text-to-image via the flux trigger node.
    #[serde(rename = "ct_flux_t2i")]
    FluxT2i,
    /// Multi-angle camera transform over prior-stage frames.
    #[serde(rename = "ct_qwen_cameratransform")]
    QwenCameraTransform,
    /// Image-to-image via a plain sampler workflow.
    #[serde(rename = "ct_qwen_i2i")]
    QwenI2i,
    /// Image-to-video over prior-stage frames.
    #[serde(rename = "ct_wan2_5s")]
    Wan25s,
}

/// Host pool a family draws its workers from. Both qwen families share
/// a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostGroup {
    Flux,
    Qwen,
    Wan,
}

/// Derived-output marker for families that consume prior-stage frames.
///
/// A frame `F` of subshot `name` counts as done when the shot directory
/// holds `{name}__{F}__{infix}*` with one of the listed extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutputPattern {
    pub infix: &'static str,
    pub extensions: &'static [&'static str],
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

impl JobFamily {
    /// Every known family, in dispatch order.
    pub const ALL: [JobFamily; 4] = [
        JobFamily::FluxT2i,
        JobFamily::QwenCameraTransform,
        JobFamily::QwenI2i,
        JobFamily::Wan25s,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            JobFamily::FluxT2i => "ct_flux_t2i",
            JobFamily::QwenCameraTransform => "ct_qwen_cameratransform",
            JobFamily::QwenI2i => "ct_qwen_i2i",
            JobFamily::Wan25s => "ct_wan2_5s",
        }
    }

    /// Look up a family by its exact tag. Surrounding whitespace is ignored.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    pub fn host_group(self) -> HostGroup {
        match self {
            JobFamily::FluxT2i => HostGroup::Flux,
            JobFamily::Wan25s => HostGroup::Wan,
            JobFamily::QwenI2i | JobFamily::QwenCameraTransform => HostGroup::Qwen,
        }
    }

    /// File name of the base workflow template inside the templates directory.
    pub fn template_file(self) -> &'static str {
        match self {
            JobFamily::FluxT2i => "ct_flux_t2i_node.json",
            JobFamily::QwenCameraTransform => "ct_qwen_cameratransform_base.json",
            JobFamily::QwenI2i => "ct_qwen_i2i_base.json",
            JobFamily::Wan25s => "ct_wan2_5s_base.json",
        }
    }

    /// Field holding the per-descriptor iteration count. `None` means the
    /// family always submits exactly once.
    pub fn iteration_field(self) -> Option<&'static str> {
        match self {
            JobFamily::FluxT2i => Some("FLUX_ITERATIONS"),
            JobFamily::QwenI2i | JobFamily::QwenCameraTransform => Some("GENERATE_QWEN_ANGLES"),
            JobFamily::Wan25s => None,
        }
    }

    /// Whether descriptors of this family carry a composed text prompt.
    pub fn composes_prompt(self) -> bool {
        !matches!(self, JobFamily::QwenCameraTransform)
    }

    /// Marker for families whose inputs are prior-stage frames on disk.
    pub fn frame_output(self) -> Option<FrameOutputPattern> {
        match self {
            JobFamily::Wan25s => Some(FrameOutputPattern {
                infix: "",
                extensions: VIDEO_EXTENSIONS,
            }),
            JobFamily::QwenCameraTransform => Some(FrameOutputPattern {
                infix: "cam",
                extensions: IMAGE_EXTENSIONS,
            }),
            JobFamily::FluxT2i | JobFamily::QwenI2i => None,
        }
    }

    /// Status field written back into the config, e.g. `STATUS_CTFLUXT2I`.
    pub fn status_key(self) -> String {
        format!("STATUS_{}", self.tag().to_uppercase().replace('_', ""))
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JobFamily {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|f| f.tag()).collect();
            CoreError::Validation(format!(
                "Unknown job family '{s}'. Must be one of: {}",
                known.join(", ")
            ))
        })
    }
}

impl HostGroup {
    /// Global field holding the comma-separated host list.
    pub fn host_key(self) -> &'static str {
        match self {
            HostGroup::Flux => "FLUX_HOST",
            HostGroup::Qwen => "QWEN_HOST",
            HostGroup::Wan => "WAN_HOST",
        }
    }

    /// Key under which the split host list is stored.
    pub fn hosts_key(self) -> &'static str {
        match self {
            HostGroup::Flux => "FLUX_HOSTS",
            HostGroup::Qwen => "QWEN_HOSTS",
            HostGroup::Wan => "WAN_HOSTS",
        }
    }

    pub const ALL: [HostGroup; 3] = [HostGroup::Flux, HostGroup::Qwen, HostGroup::Wan];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_sorted_by_tag() {
        let mut tags: Vec<&str> = JobFamily::ALL.iter().map(|f| f.tag()).collect();
        let original = tags.clone();
        tags.sort();
        assert_eq!(tags, original);

        let mut families = JobFamily::ALL.to_vec();
        families.reverse();
        families.sort();
        assert_eq!(families, JobFamily::ALL.to_vec());
    }

    #[test]
    fn tag_round_trips_through_from_tag() {
        for family in JobFamily::ALL {
            assert_eq!(JobFamily::from_tag(family.tag()), Some(family));
        }
        assert_eq!(JobFamily::from_tag("  ct_wan2_5s "), Some(JobFamily::Wan25s));
        assert_eq!(JobFamily::from_tag("ct_ltx2_i2v"), None);
    }

    #[test]
    fn unknown_tag_is_a_validation_error() {
        let err = "flux".parse::<JobFamily>().unwrap_err();
        assert!(err.to_string().contains("ct_flux_t2i"));
    }

    #[test]
    fn status_key_strips_underscores() {
        assert_eq!(JobFamily::FluxT2i.status_key(), "STATUS_CTFLUXT2I");
        assert_eq!(
            JobFamily::QwenCameraTransform.status_key(),
            "STATUS_CTQWENCAMERATRANSFORM"
        );
    }

    #[test]
    fn qwen_families_share_a_pool() {
        assert_eq!(JobFamily::QwenI2i.host_group(), HostGroup::Qwen);
        assert_eq!(JobFamily::QwenCameraTransform.host_group(), HostGroup::Qwen);
        assert_eq!(HostGroup::Qwen.hosts_key(), "QWEN_HOSTS");
    }

    #[test]
    fn only_frame_families_have_output_patterns() {
        assert!(JobFamily::Wan25s.frame_output().is_some());
        assert!(JobFamily::QwenCameraTransform.frame_output().is_some());
        assert!(JobFamily::FluxT2i.frame_output().is_none());
        assert!(JobFamily::QwenI2i.frame_output().is_none());
    }
}
