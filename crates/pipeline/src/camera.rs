//! Camera view lists for the multi-angle transform family.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shotq_core::camera_mode::CameraMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAngle {
    pub horizontal: f64,
    pub vertical: f64,
    pub zoom: f64,
}

impl CameraAngle {
    const fn new(horizontal: f64, vertical: f64, zoom: f64) -> Self {
        Self {
            horizontal,
            vertical,
            zoom,
        }
    }
}

const CHARACTER_SHEET: [CameraAngle; 20] = [
    CameraAngle::new(0.0, 0.0, 5.0),
    CameraAngle::new(45.0, 0.0, 5.0),
    CameraAngle::new(90.0, 0.0, 5.0),
    CameraAngle::new(135.0, 0.0, 5.0),
    CameraAngle::new(180.0, 0.0, 5.0),
    CameraAngle::new(225.0, 0.0, 5.0),
    CameraAngle::new(270.0, 0.0, 5.0),
    CameraAngle::new(315.0, 0.0, 5.0),
    CameraAngle::new(0.0, 35.0, 4.2),
    CameraAngle::new(0.0, -25.0, 5.8),
    CameraAngle::new(90.0, 20.0, 4.8),
    CameraAngle::new(270.0, 20.0, 4.8),
    CameraAngle::new(45.0, 25.0, 4.0),
    CameraAngle::new(135.0, 25.0, 4.0),
    CameraAngle::new(0.0, 0.0, 3.2),
    CameraAngle::new(0.0, 0.0, 7.0),
    CameraAngle::new(180.0, 15.0, 5.0),
    CameraAngle::new(90.0, -20.0, 5.2),
    CameraAngle::new(270.0, -20.0, 5.2),
    CameraAngle::new(0.0, 50.0, 3.5),
];

const FRONT_BACK_LEFT_RIGHT: [CameraAngle; 4] = [
    CameraAngle::new(0.0, 0.0, 5.0),
    CameraAngle::new(180.0, 0.0, 5.0),
    CameraAngle::new(90.0, 0.0, 5.0),
    CameraAngle::new(270.0, 0.0, 5.0),
];

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Views for one input frame. Random modes are reproducible per seed.
pub fn angles(mode: CameraMode, seed: u32) -> Vec<CameraAngle> {
    match mode {
        CameraMode::Turntable => (0..36)
            .map(|i| CameraAngle::new(f64::from(i * 10), 0.0, 5.0))
            .collect(),
        CameraMode::Random(count) => {
            let mut rng = StdRng::seed_from_u64(u64::from(seed));
            (0..count)
                .map(|_| {
                    CameraAngle::new(
                        round2(rng.random_range(0.0..360.0)),
                        round2(rng.random_range(-30.0..60.0)),
                        round2(rng.random_range(2.5..7.5)),
                    )
                })
                .collect()
        }
        CameraMode::CharacterSheet => CHARACTER_SHEET.to_vec(),
        CameraMode::FrontBackLeftRight => FRONT_BACK_LEFT_RIGHT.to_vec(),
    }
}
