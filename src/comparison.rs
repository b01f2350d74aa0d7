use crate::types::{HumanPose, Keypoint, L_HIP, L_SHOULDER, NECK, R_HIP, R_SHOULDER};

/// A joint angle measured clockwise from the `from` limb to the `to` limb.
/// Each limb is a `(origin, end)` keypoint pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AngleDefinition {
    pub name: &'static str,
    pub from: (usize, usize),
    pub to: (usize, usize),
}

pub const FRONT_KNEE: AngleDefinition = AngleDefinition {
    name: "front knee",
    from: (12, 13),
    to: (12, 11),
};

pub const BACK_KNEE: AngleDefinition = AngleDefinition {
    name: "back knee",
    from: (9, 10),
    to: (9, 8),
};

pub const JOINT_ANGLES: [AngleDefinition; 8] = [
    FRONT_KNEE,
    BACK_KNEE,
    AngleDefinition {
        name: "right elbow",
        from: (3, 4),
        to: (3, 2),
    },
    AngleDefinition {
        name: "left elbow",
        from: (6, 7),
        to: (6, 5),
    },
    AngleDefinition {
        name: "right shoulder",
        from: (2, 3),
        to: (2, 8),
    },
    AngleDefinition {
        name: "left shoulder",
        from: (5, 6),
        to: (5, 11),
    },
    AngleDefinition {
        name: "right hip",
        from: (8, 9),
        to: (8, 2),
    },
    AngleDefinition {
        name: "left hip",
        from: (11, 12),
        to: (11, 5),
    },
];

/// Clockwise angle in whole degrees, within `[0, 360)`, from limb `from` to
/// limb `to`, in image coordinates (y grows downwards). `None` when any of
/// the keypoints is missing or a limb has zero length.
pub fn angle_between_limbs(
    pose: &HumanPose,
    from: (usize, usize),
    to: (usize, usize),
) -> Option<i32> {
    let first = limb_direction(pose, from)?;
    let second = limb_direction(pose, to)?;
    let degrees = (second - first).to_degrees().rem_euclid(360.0);
    Some((degrees.round() as i32).rem_euclid(360))
}

pub fn measure(pose: &HumanPose, angle: &AngleDefinition) -> Option<i32> {
    angle_between_limbs(pose, angle.from, angle.to)
}

fn limb_direction(pose: &HumanPose, (origin, end): (usize, usize)) -> Option<f32> {
    let a = pose.keypoint(origin)?;
    let b = pose.keypoint(end)?;
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dy.atan2(dx))
}

fn shoulder_center(pose: &HumanPose) -> Option<Keypoint> {
    Some(pose.keypoint(R_SHOULDER)?.midpoint(&pose.keypoint(L_SHOULDER)?))
}

fn hip_center(pose: &HumanPose) -> Option<Keypoint> {
    match (pose.keypoint(R_HIP), pose.keypoint(L_HIP)) {
        (Some(r), Some(l)) => Some(r.midpoint(&l)),
        (Some(hip), None) | (None, Some(hip)) => Some(hip),
        (None, None) => None,
    }
}

/// Matching anchor points on both poses: the necks when both have one,
/// otherwise the shoulder midpoints of both.
fn shared_anchor(reference: &HumanPose, live: &HumanPose) -> Option<(Keypoint, Keypoint)> {
    if let (Some(r), Some(l)) = (reference.keypoint(NECK), live.keypoint(NECK)) {
        return Some((r, l));
    }
    Some((shoulder_center(reference)?, shoulder_center(live)?))
}

fn torso_length(pose: &HumanPose, anchor: Keypoint) -> Option<f32> {
    let length = anchor.distance(&hip_center(pose)?);
    (length > f32::EPSILON).then_some(length)
}

fn shoulder_width(pose: &HumanPose) -> Option<f32> {
    let width = pose.keypoint(R_SHOULDER)?.distance(&pose.keypoint(L_SHOULDER)?);
    (width > f32::EPSILON).then_some(width)
}

/// Scale factor from `reference` to `live` using the body measure both
/// poses have: torso length first, shoulder width otherwise.
fn body_scale(
    reference: &HumanPose,
    live: &HumanPose,
    (ref_anchor, live_anchor): (Keypoint, Keypoint),
) -> Option<f32> {
    match (
        torso_length(reference, ref_anchor),
        torso_length(live, live_anchor),
    ) {
        (Some(r), Some(l)) => Some(l / r),
        _ => Some(shoulder_width(live)? / shoulder_width(reference)?),
    }
}

/// Places the first reference pose over every live pose: the reference is
/// translated onto the live neck (or shoulder midpoint) and scaled to the
/// live body size. Live poses that cannot be anchored are skipped.
pub fn scale_human_pose(reference: &[HumanPose], live: &[HumanPose]) -> Vec<HumanPose> {
    let Some(reference) = reference.first() else {
        return Vec::new();
    };

    live.iter()
        .filter_map(|target| {
            let anchors = shared_anchor(reference, target)?;
            let scale = body_scale(reference, target, anchors)?;
            let (ref_anchor, live_anchor) = anchors;
            let keypoints = reference
                .keypoints
                .iter()
                .map(|kp| {
                    if kp.is_present() {
                        Keypoint::new(
                            live_anchor.x + (kp.x - ref_anchor.x) * scale,
                            live_anchor.y + (kp.y - ref_anchor.y) * scale,
                        )
                    } else {
                        Keypoint::ABSENT
                    }
                })
                .collect();
            Some(HumanPose::new(keypoints, target.score))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct JointDeviation {
    pub name: &'static str,
    pub reference: i32,
    pub live: i32,
    /// Signed difference `live - reference` wrapped into `[-180, 180)`.
    pub difference: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseComparison {
    pub joints: Vec<JointDeviation>,
}

impl PoseComparison {
    pub fn mean_abs_deviation(&self) -> Option<f32> {
        if self.joints.is_empty() {
            return None;
        }
        let total: i32 = self.joints.iter().map(|j| j.difference.abs()).sum();
        Some(total as f32 / self.joints.len() as f32)
    }

    pub fn worst(&self) -> Option<&JointDeviation> {
        self.joints.iter().max_by_key(|j| j.difference.abs())
    }
}

/// Compares every joint angle measurable on both poses.
pub fn compare_angles(reference: &HumanPose, live: &HumanPose) -> PoseComparison {
    let joints = JOINT_ANGLES
        .iter()
        .filter_map(|angle| {
            let r = measure(reference, angle)?;
            let l = measure(live, angle)?;
            Some(JointDeviation {
                name: angle.name,
                reference: r,
                live: l,
                difference: (l - r + 180).rem_euclid(360) - 180,
            })
        })
        .collect();
    PoseComparison { joints }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with(points: &[(usize, f32, f32)]) -> HumanPose {
        let mut pose = HumanPose::empty(1.0);
        for &(idx, x, y) in points {
            pose.keypoints[idx] = Keypoint::new(x, y);
        }
        pose
    }

    #[test]
    fn right_angle_is_measured_clockwise() {
        // Knee at origin, ankle to the right, hip straight down (y grows down).
        let pose = pose_with(&[(12, 0.0, 0.0), (13, 10.0, 0.0), (11, 0.0, 10.0)]);
        assert_eq!(measure(&pose, &FRONT_KNEE), Some(90));
        assert_eq!(angle_between_limbs(&pose, (12, 11), (12, 13)), Some(270));
    }

    #[test]
    fn straight_leg_is_half_turn() {
        let pose = pose_with(&[(9, 5.0, 5.0), (10, 5.0, 15.0), (8, 5.0, -5.0)]);
        assert_eq!(measure(&pose, &BACK_KNEE), Some(180));
    }

    #[test]
    fn missing_keypoint_gives_no_angle() {
        let pose = pose_with(&[(12, 0.0, 0.0), (13, 10.0, 0.0)]);
        assert_eq!(measure(&pose, &FRONT_KNEE), None);
    }

    fn upper_body(offset: (f32, f32), size: f32) -> HumanPose {
        let (ox, oy) = offset;
        pose_with(&[
            (NECK, ox, oy),
            (R_SHOULDER, ox - size, oy),
            (L_SHOULDER, ox + size, oy),
            (R_HIP, ox - size / 2.0, oy + 3.0 * size),
            (L_HIP, ox + size / 2.0, oy + 3.0 * size),
            (0, ox, oy - size),
        ])
    }

    #[test]
    fn scaling_onto_itself_is_identity() {
        let pose = upper_body((50.0, 40.0), 10.0);
        let scaled = scale_human_pose(&[pose.clone()], &[pose.clone()]);
        assert_eq!(scaled, vec![pose]);
    }

    #[test]
    fn reference_follows_live_position_and_size() {
        let reference = upper_body((50.0, 40.0), 10.0);
        let live = upper_body((200.0, 100.0), 20.0);
        let scaled = scale_human_pose(&[reference], &[live.clone()]);

        assert_eq!(scaled.len(), 1);
        for (got, want) in scaled[0].keypoints.iter().zip(live.keypoints.iter()) {
            assert!((got.x - want.x).abs() < 1e-3 && (got.y - want.y).abs() < 1e-3);
        }
        assert_eq!(scaled[0].score, live.score);
    }

    #[test]
    fn missing_live_neck_anchors_both_on_shoulders() {
        let reference = upper_body((50.0, 40.0), 10.0);
        // Neck sits below the shoulder line, as detected necks often do.
        let mut live = upper_body((200.0, 100.0), 20.0);
        live.keypoints[NECK] = Keypoint::ABSENT;
        let mut reference_low_neck = reference.clone();
        reference_low_neck.keypoints[NECK] = Keypoint::new(50.0, 45.0);

        let scaled = scale_human_pose(&[reference_low_neck], &[live.clone()]);
        assert_eq!(scaled.len(), 1);
        for idx in [R_SHOULDER, L_SHOULDER, R_HIP, L_HIP, 0] {
            let (got, want) = (scaled[0].keypoints[idx], live.keypoints[idx]);
            assert!(
                (got.x - want.x).abs() < 1e-3 && (got.y - want.y).abs() < 1e-3,
                "keypoint {idx}: {got:?} != {want:?}"
            );
        }
    }

    #[test]
    fn empty_inputs_scale_to_nothing() {
        let pose = upper_body((0.0, 0.0), 5.0);
        assert!(scale_human_pose(&[], &[pose.clone()]).is_empty());
        assert!(scale_human_pose(&[pose], &[]).is_empty());
    }

    #[test]
    fn comparison_wraps_differences() {
        let reference = pose_with(&[(12, 0.0, 0.0), (13, 10.0, 0.0), (11, 10.0, -1.0)]);
        let live = pose_with(&[(12, 0.0, 0.0), (13, 10.0, 0.0), (11, 10.0, 1.0)]);
        let comparison = compare_angles(&reference, &live);

        assert_eq!(comparison.joints.len(), 1);
        let knee = &comparison.joints[0];
        assert_eq!(knee.name, "front knee");
        assert_eq!((knee.reference, knee.live), (354, 6));
        assert_eq!(knee.difference, 12);
        assert_eq!(comparison.mean_abs_deviation(), Some(12.0));
        assert_eq!(comparison.worst().map(|j| j.name), Some("front knee"));
    }
}
