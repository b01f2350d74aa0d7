use std::time::Instant;

pub const KEYPOINTS_NUMBER: usize = 18;

pub const KEYPOINT_NAMES: [&str; KEYPOINTS_NUMBER] = [
    "nose",
    "neck",
    "r_shoulder",
    "r_elbow",
    "r_wrist",
    "l_shoulder",
    "l_elbow",
    "l_wrist",
    "r_hip",
    "r_knee",
    "r_ankle",
    "l_hip",
    "l_knee",
    "l_ankle",
    "r_eye",
    "l_eye",
    "r_ear",
    "l_ear",
];

pub const NECK: usize = 1;
pub const R_SHOULDER: usize = 2;
pub const L_SHOULDER: usize = 5;
pub const R_HIP: usize = 8;
pub const L_HIP: usize = 11;

/// Packed RGB8 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(3)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.rgb.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub const ABSENT: Keypoint = Keypoint { x: -1.0, y: -1.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_present(&self) -> bool {
        *self != Self::ABSENT
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(&self, other: &Keypoint) -> Keypoint {
        Keypoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// One detected person: keypoints in [`KEYPOINT_NAMES`] order plus a score.
#[derive(Clone, Debug, PartialEq)]
pub struct HumanPose {
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl HumanPose {
    pub fn new(keypoints: Vec<Keypoint>, score: f32) -> Self {
        Self { keypoints, score }
    }

    pub fn empty(score: f32) -> Self {
        Self::new(vec![Keypoint::ABSENT; KEYPOINTS_NUMBER], score)
    }

    pub fn keypoint(&self, index: usize) -> Option<Keypoint> {
        self.keypoints
            .get(index)
            .copied()
            .filter(Keypoint::is_present)
    }

    pub fn present_count(&self) -> usize {
        self.keypoints.iter().filter(|kp| kp.is_present()).count()
    }

    /// `x,y x,y ... score` with zero decimals.
    pub fn raw_line(&self) -> String {
        let mut line = String::new();
        for keypoint in &self.keypoints {
            line.push_str(&format!("{:.0},{:.0} ", keypoint.x, keypoint.y));
        }
        line.push_str(&format!("{:.0}", self.score));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_keypoints_are_filtered() {
        let mut pose = HumanPose::empty(1.0);
        pose.keypoints[NECK] = Keypoint::new(10.0, 20.0);

        assert_eq!(pose.keypoint(NECK), Some(Keypoint::new(10.0, 20.0)));
        assert_eq!(pose.keypoint(0), None);
        assert_eq!(pose.keypoint(99), None);
        assert_eq!(pose.present_count(), 1);
    }

    #[test]
    fn raw_line_rounds_coordinates_and_score() {
        let pose = HumanPose::new(
            vec![Keypoint::new(10.4, 20.6), Keypoint::ABSENT],
            12.7,
        );
        assert_eq!(pose.raw_line(), "10,21 -1,-1 13");
    }
}
