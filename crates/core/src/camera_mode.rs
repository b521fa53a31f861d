//! View modes of the multi-angle camera transform family.
//!
//! The mode decides how many views one input frame expands into. The
//! actual angle values are produced at payload build time.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::FieldMap;

pub const MODE_KEY: &str = "QWEN_CAMERATRANSFORMATION_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    /// 36 views, 10 degrees apart, level.
    Turntable,
    /// `n` views drawn from an RNG seeded by the job seed.
    Random(usize),
    CharacterSheet,
    #[default]
    FrontBackLeftRight,
}

impl CameraMode {
    pub fn view_count(self) -> usize {
        match self {
            CameraMode::Turntable => 36,
            CameraMode::Random(n) => n,
            CameraMode::CharacterSheet => 20,
            CameraMode::FrontBackLeftRight => 4,
        }
    }

    /// Mode named by the subshot's fields; absent or blank means the default.
    pub fn from_fields(fields: &FieldMap) -> Result<Self, CoreError> {
        match fields.get(MODE_KEY).filter(|m| !m.trim().is_empty()) {
            Some(raw) => raw.parse(),
            None => Ok(CameraMode::default()),
        }
    }
}

impl FromStr for CameraMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tt" | "turntable" => Ok(CameraMode::Turntable),
            "5angles" => Ok(CameraMode::Random(5)),
            "10angles" => Ok(CameraMode::Random(10)),
            "20angles" => Ok(CameraMode::Random(20)),
            "charactersheet" => Ok(CameraMode::CharacterSheet),
            "frontbackleftright" => Ok(CameraMode::FrontBackLeftRight),
            _ => Err(CoreError::InvalidField {
                key: MODE_KEY.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraMode::Turntable => f.write_str("TT"),
            CameraMode::Random(n) => write!(f, "{n}angles"),
            CameraMode::CharacterSheet => f.write_str("CharacterSheet"),
            CameraMode::FrontBackLeftRight => f.write_str("FrontBackLeftRight"),
        }
    }
}
