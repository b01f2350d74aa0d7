use std::cmp::Ordering;

use super::{EstimatorConfig, feature_map::FeatureMap, peaks::Peak};
use crate::types::{HumanPose, KEYPOINTS_NUMBER, Keypoint};

/// Keypoint pairs (0-based) connected by a part affinity field, in the
/// order limbs are assembled. The last two only fill in missing joints.
pub const LIMB_KEYPOINTS: [(usize, usize); 19] = [
    (1, 2),
    (1, 5),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (1, 8),
    (8, 9),
    (9, 10),
    (1, 11),
    (11, 12),
    (12, 13),
    (1, 0),
    (0, 14),
    (14, 16),
    (0, 15),
    (15, 17),
    (2, 16),
    (5, 17),
];

/// PAF channel pair (x, y) for each entry of [`LIMB_KEYPOINTS`].
pub const LIMB_PAF_CHANNELS: [(usize, usize); 19] = [
    (12, 13),
    (20, 21),
    (14, 15),
    (16, 17),
    (22, 23),
    (24, 25),
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (8, 9),
    (10, 11),
    (28, 29),
    (30, 31),
    (34, 35),
    (32, 33),
    (36, 37),
    (18, 19),
    (26, 27),
];

const MID_POINTS: usize = 10;
const FIRST_EXTRA_LIMB: usize = 17;

#[derive(Clone, Copy, Debug)]
struct Connection {
    first: usize,
    second: usize,
    score: f32,
}

/// Partially assembled person: peak id per keypoint.
#[derive(Clone, Debug)]
struct PoseCandidate {
    peaks: [Option<usize>; KEYPOINTS_NUMBER],
    joints: usize,
    score: f32,
}

impl PoseCandidate {
    fn new() -> Self {
        Self {
            peaks: [None; KEYPOINTS_NUMBER],
            joints: 0,
            score: 0.0,
        }
    }

    fn single(joint: usize, peak: &Peak) -> Self {
        let mut candidate = Self::new();
        candidate.peaks[joint] = Some(peak.id);
        candidate.joints = 1;
        candidate.score = peak.score;
        candidate
    }

    fn pair(joint_a: usize, joint_b: usize, connection: &Connection, candidates: &[Peak]) -> Self {
        let mut candidate = Self::new();
        candidate.peaks[joint_a] = Some(connection.first);
        candidate.peaks[joint_b] = Some(connection.second);
        candidate.joints = 2;
        candidate.score = candidates[connection.first].score
            + candidates[connection.second].score
            + connection.score;
        candidate
    }
}

/// Assembles per-keypoint peaks into people using the part affinity fields.
/// `all_peaks` must carry global ids (see `assign_global_ids`).
pub fn group_peaks_to_poses(
    all_peaks: &[Vec<Peak>],
    pafs: &[FeatureMap],
    cfg: &EstimatorConfig,
) -> Vec<HumanPose> {
    let candidates: Vec<Peak> = all_peaks.iter().flatten().copied().collect();
    let mut subset: Vec<PoseCandidate> = Vec::new();

    for (limb, (&(joint_a, joint_b), &(paf_x, paf_y))) in
        LIMB_KEYPOINTS.iter().zip(LIMB_PAF_CHANNELS.iter()).enumerate()
    {
        let (Some(cand_a), Some(cand_b)) = (all_peaks.get(joint_a), all_peaks.get(joint_b)) else {
            continue;
        };
        let (Some(field_x), Some(field_y)) = (pafs.get(paf_x), pafs.get(paf_y)) else {
            continue;
        };

        if cand_a.is_empty() && cand_b.is_empty() {
            continue;
        }
        if cand_a.is_empty() || cand_b.is_empty() {
            let (joint, lonely) = if cand_a.is_empty() {
                (joint_b, cand_b)
            } else {
                (joint_a, cand_a)
            };
            for peak in lonely {
                let known = subset.iter().any(|pose| pose.peaks[joint] == Some(peak.id));
                if !known {
                    subset.push(PoseCandidate::single(joint, peak));
                }
            }
            continue;
        }

        let connections = connect_limb(cand_a, cand_b, field_x, field_y, cfg);
        if connections.is_empty() {
            continue;
        }

        if limb == 0 {
            subset = connections
                .iter()
                .map(|c| PoseCandidate::pair(joint_a, joint_b, c, &candidates))
                .collect();
        } else if limb >= FIRST_EXTRA_LIMB {
            for connection in &connections {
                for pose in subset.iter_mut() {
                    if pose.peaks[joint_a] == Some(connection.first) && pose.peaks[joint_b].is_none() {
                        pose.peaks[joint_b] = Some(connection.second);
                    } else if pose.peaks[joint_b] == Some(connection.second)
                        && pose.peaks[joint_a].is_none()
                    {
                        pose.peaks[joint_a] = Some(connection.first);
                    }
                }
            }
        } else {
            for connection in &connections {
                let mut attached = false;
                for pose in subset.iter_mut() {
                    if pose.peaks[joint_a] == Some(connection.first) {
                        pose.peaks[joint_b] = Some(connection.second);
                        pose.joints += 1;
                        pose.score += candidates[connection.second].score + connection.score;
                        attached = true;
                    }
                }
                if !attached {
                    subset.push(PoseCandidate::pair(joint_a, joint_b, connection, &candidates));
                }
            }
        }
    }

    subset
        .into_iter()
        .filter(|pose| {
            pose.joints >= cfg.min_joints && pose.score / pose.joints as f32 >= cfg.min_subset_score
        })
        .map(|pose| {
            let mut keypoints = vec![Keypoint::ABSENT; KEYPOINTS_NUMBER];
            for (slot, peak_id) in keypoints.iter_mut().zip(pose.peaks.iter()) {
                if let Some(peak) = peak_id.and_then(|id| candidates.get(id)) {
                    *slot = Keypoint::new(peak.x as f32 + 0.5, peak.y as f32 + 0.5);
                }
            }
            HumanPose::new(keypoints, pose.score * pose.joints.saturating_sub(1) as f32)
        })
        .collect()
}

/// Scores every A-B pair along the affinity field and keeps the best
/// non-conflicting pairs.
fn connect_limb(
    cand_a: &[Peak],
    cand_b: &[Peak],
    field_x: &FeatureMap,
    field_y: &FeatureMap,
    cfg: &EstimatorConfig,
) -> Vec<Connection> {
    let half_height = (field_x.height / 2) as f32;
    let mut scored = Vec::new();

    for (i, a) in cand_a.iter().enumerate() {
        for (j, b) in cand_b.iter().enumerate() {
            let dx = (b.x - a.x) as f32;
            let dy = (b.y - a.y) as f32;
            let norm = (dx * dx + dy * dy).sqrt();
            if norm == 0.0 {
                continue;
            }
            let (ux, uy) = (dx / norm, dy / norm);

            let step_x = dx / (MID_POINTS - 1) as f32;
            let step_y = dy / (MID_POINTS - 1) as f32;
            let mut sum = 0.0;
            let mut count = 0usize;
            for n in 0..MID_POINTS {
                let px = (a.x as f32 + n as f32 * step_x).round() as i32;
                let py = (a.y as f32 + n as f32 * step_y).round() as i32;
                let score = ux * field_x.at(px, py) + uy * field_y.at(px, py);
                if score > cfg.mid_points_score_threshold {
                    sum += score;
                    count += 1;
                }
            }

            let found_ratio = count as f32 / MID_POINTS as f32;
            let mean = if count > 0 { sum / count as f32 } else { 0.0 };
            let mid_score = mean + (half_height / norm - 1.0).min(0.0);
            if mid_score > 0.0 && found_ratio > cfg.found_mid_points_ratio_threshold {
                scored.push(Connection {
                    first: i,
                    second: j,
                    score: mid_score,
                });
            }
        }
    }

    scored.sort_by(|l, r| r.score.partial_cmp(&l.score).unwrap_or(Ordering::Equal));

    let limit = cand_a.len().min(cand_b.len());
    let mut used_a = vec![false; cand_a.len()];
    let mut used_b = vec![false; cand_b.len()];
    let mut connections = Vec::new();
    for connection in scored {
        if connections.len() == limit {
            break;
        }
        if used_a[connection.first] || used_b[connection.second] {
            continue;
        }
        used_a[connection.first] = true;
        used_b[connection.second] = true;
        connections.push(Connection {
            first: cand_a[connection.first].id,
            second: cand_b[connection.second].id,
            score: connection.score,
        });
    }
    connections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::estimator::peaks::assign_global_ids;
    use crate::types::{L_SHOULDER, NECK, R_SHOULDER};

    const SIZE: u32 = 40;

    fn peak(x: i32, y: i32) -> Peak {
        Peak {
            id: 0,
            x,
            y,
            score: 0.9,
        }
    }

    fn shoulders_scene() -> Vec<Vec<Peak>> {
        let mut all_peaks = vec![Vec::new(); KEYPOINTS_NUMBER];
        all_peaks[NECK].push(peak(20, 20));
        all_peaks[R_SHOULDER].push(peak(30, 20));
        all_peaks[L_SHOULDER].push(peak(10, 20));
        assign_global_ids(&mut all_peaks);
        all_peaks
    }

    fn empty_pafs() -> Vec<FeatureMap> {
        vec![FeatureMap::filled(SIZE, SIZE, 0.0); 38]
    }

    #[test]
    fn aligned_fields_join_neck_and_shoulders() {
        let mut pafs = empty_pafs();
        // neck -> right shoulder points +x, neck -> left shoulder points -x.
        pafs[12] = FeatureMap::filled(SIZE, SIZE, 1.0);
        pafs[20] = FeatureMap::filled(SIZE, SIZE, -1.0);

        let poses = group_peaks_to_poses(&shoulders_scene(), &pafs, &EstimatorConfig::default());

        assert_eq!(poses.len(), 1);
        let pose = &poses[0];
        assert_eq!(pose.present_count(), 3);
        assert_eq!(pose.keypoints[NECK], Keypoint::new(20.5, 20.5));
        assert_eq!(pose.keypoints[R_SHOULDER], Keypoint::new(30.5, 20.5));
        assert_eq!(pose.keypoints[L_SHOULDER], Keypoint::new(10.5, 20.5));
        // (3 peaks * 0.9 + 2 limbs * 1.0) * (3 joints - 1)
        assert!((pose.score - 9.4).abs() < 1e-4);
    }

    #[test]
    fn opposing_field_leaves_too_few_joints() {
        let mut pafs = empty_pafs();
        pafs[12] = FeatureMap::filled(SIZE, SIZE, -1.0);
        pafs[20] = FeatureMap::filled(SIZE, SIZE, -1.0);

        let poses = group_peaks_to_poses(&shoulders_scene(), &pafs, &EstimatorConfig::default());
        assert!(poses.is_empty());
    }

    #[test]
    fn two_people_are_kept_apart() {
        let mut all_peaks = vec![Vec::new(); KEYPOINTS_NUMBER];
        all_peaks[NECK].extend([peak(10, 10), peak(10, 30)]);
        all_peaks[R_SHOULDER].extend([peak(18, 10), peak(18, 30)]);
        all_peaks[L_SHOULDER].extend([peak(2, 10), peak(2, 30)]);
        assign_global_ids(&mut all_peaks);

        let mut pafs = empty_pafs();
        // Fields only exist along each person's shoulder line.
        for y in [10, 30] {
            for x in 0..SIZE {
                pafs[12].set(x, y, 1.0);
                pafs[20].set(x, y, -1.0);
            }
        }

        let poses = group_peaks_to_poses(&all_peaks, &pafs, &EstimatorConfig::default());
        assert_eq!(poses.len(), 2);
        for pose in &poses {
            let neck = pose.keypoints[NECK];
            assert_eq!(pose.keypoints[R_SHOULDER].y, neck.y);
            assert_eq!(pose.keypoints[L_SHOULDER].y, neck.y);
        }
    }
}
