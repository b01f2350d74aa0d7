use super::feature_map::FeatureMap;

/// Local maximum of a keypoint heatmap. `id` is unique across all heatmaps of
/// one frame once [`assign_global_ids`] has run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub id: usize,
    pub x: i32,
    pub y: i32,
    pub score: f32,
}

impl Peak {
    fn distance(&self, other: &Peak) -> f32 {
        (((self.x - other.x).pow(2) + (self.y - other.y).pow(2)) as f32).sqrt()
    }
}

/// Values above `threshold` that are strictly greater than their four
/// neighbours; of peaks closer than `min_distance`, the left-most survives.
pub fn find_peaks(heatmap: &FeatureMap, threshold: f32, min_distance: f32) -> Vec<Peak> {
    let value = |x: i32, y: i32| -> f32 {
        if x < 0 || y < 0 || x >= heatmap.width as i32 || y >= heatmap.height as i32 {
            return 0.0;
        }
        let v = heatmap.at(x, y);
        if v >= threshold { v } else { 0.0 }
    };

    let mut candidates = Vec::new();
    for y in 0..heatmap.height as i32 {
        for x in 0..heatmap.width as i32 {
            let v = value(x, y);
            if v > value(x - 1, y) && v > value(x + 1, y) && v > value(x, y - 1) && v > value(x, y + 1)
            {
                candidates.push(Peak {
                    id: 0,
                    x,
                    y,
                    score: v,
                });
            }
        }
    }
    candidates.sort_by_key(|peak| peak.x);

    let mut suppressed = vec![false; candidates.len()];
    let mut peaks = Vec::new();
    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..candidates.len() {
            if candidates[i].distance(&candidates[j]) < min_distance {
                suppressed[j] = true;
            }
        }
        peaks.push(Peak {
            id: peaks.len(),
            ..candidates[i]
        });
    }
    peaks
}

/// Offsets per-heatmap ids so that every peak of the frame has a unique id
/// equal to its position in the flattened candidate list.
pub fn assign_global_ids(all_peaks: &mut [Vec<Peak>]) {
    let mut before = 0;
    for peaks in all_peaks.iter_mut() {
        for peak in peaks.iter_mut() {
            peak.id += before;
        }
        before += peaks.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(points: &[(u32, u32, f32)]) -> FeatureMap {
        let mut map = FeatureMap::filled(12, 8, 0.0);
        for &(x, y, v) in points {
            map.set(x, y, v);
        }
        map
    }

    #[test]
    fn finds_isolated_maxima_above_threshold() {
        let map = map_with(&[(2, 2, 0.9), (9, 5, 0.5), (6, 6, 0.05)]);
        let peaks = find_peaks(&map, 0.1, 3.0);

        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].x, peaks[0].y, peaks[0].id), (2, 2, 0));
        assert_eq!((peaks[1].x, peaks[1].y, peaks[1].id), (9, 5, 1));
        assert_eq!(peaks[1].score, 0.5);
    }

    #[test]
    fn close_peaks_are_suppressed() {
        let map = map_with(&[(4, 4, 0.6), (6, 4, 0.8)]);
        let peaks = find_peaks(&map, 0.1, 3.0);

        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].x, 4);
    }

    #[test]
    fn plateaus_are_not_peaks() {
        let map = map_with(&[(3, 3, 0.7), (4, 3, 0.7)]);
        assert!(find_peaks(&map, 0.1, 3.0).is_empty());
    }

    #[test]
    fn global_ids_follow_flattened_order() {
        let peak = |id| Peak {
            id,
            x: 0,
            y: 0,
            score: 1.0,
        };
        let mut all = vec![vec![peak(0), peak(1)], vec![], vec![peak(0)]];
        assign_global_ids(&mut all);
        assert_eq!(all[0][1].id, 1);
        assert_eq!(all[2][0].id, 2);
    }
}
