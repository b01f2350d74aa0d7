use rayon::prelude::*;

use crate::types::{Frame, HumanPose, KEYPOINTS_NUMBER, Keypoint};

pub const LIMBS: &[(usize, usize)] = &[
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
];

/// One RGB color per keypoint; a limb takes the color of its end keypoint.
pub const KEYPOINT_COLORS: [[u8; 3]; KEYPOINTS_NUMBER] = [
    [0, 0, 255],
    [0, 85, 255],
    [0, 170, 255],
    [0, 255, 255],
    [0, 255, 170],
    [0, 255, 85],
    [0, 255, 0],
    [85, 255, 0],
    [170, 255, 0],
    [255, 255, 0],
    [255, 170, 0],
    [255, 85, 0],
    [255, 0, 0],
    [255, 0, 85],
    [255, 0, 170],
    [255, 0, 255],
    [170, 0, 255],
    [85, 0, 255],
];

const KEYPOINT_RADIUS: i32 = 4;
const STICK_THICKNESS: i32 = 8;
const IMAGE_WEIGHT: f32 = 0.4;
const PANE_WEIGHT: f32 = 0.6;

/// Draws keypoints and limbs of every pose. Keypoints are stamped directly,
/// limbs are drawn on a copy and blended back semi-transparently.
pub fn render_human_pose(poses: &[HumanPose], frame: &mut Frame) {
    let (width, height) = (frame.width, frame.height);

    for pose in poses {
        for (keypoint, color) in pose.keypoints.iter().zip(KEYPOINT_COLORS.iter()) {
            if keypoint.is_present() {
                draw_circle(
                    &mut frame.rgb,
                    width,
                    height,
                    (keypoint.x as i32, keypoint.y as i32),
                    KEYPOINT_RADIUS,
                    *color,
                );
            }
        }
    }

    let mut pane = frame.rgb.clone();
    let mut drew_limb = false;
    for pose in poses {
        for &(a, b) in LIMBS {
            if let (Some(pa), Some(pb)) = (pose.keypoint(a), pose.keypoint(b)) {
                draw_line(
                    &mut pane,
                    width,
                    height,
                    &pa,
                    &pb,
                    KEYPOINT_COLORS[b],
                    STICK_THICKNESS,
                );
                drew_limb = true;
            }
        }
    }

    if drew_limb {
        frame
            .rgb
            .par_iter_mut()
            .zip(pane.par_iter())
            .for_each(|(dst, src)| {
                let blended = *dst as f32 * IMAGE_WEIGHT + *src as f32 * PANE_WEIGHT;
                *dst = blended.round().clamp(0.0, 255.0) as u8;
            });
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &Keypoint,
    p1: &Keypoint,
    color: [u8; 3],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.x as i32, p0.y as i32);
    let (x1, y1) = (p1.x as i32, p1.y as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        if radius > 0 {
            draw_circle(buffer, width, height, (x0, y0), radius, color);
        } else {
            put_pixel_safe(buffer, width, height, x0, y0, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 3],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 3;
    if idx + 2 < buffer.len() {
        buffer[idx..idx + 3].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![0; Frame::expected_len(w, h)], w, h)
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * frame.width + x) * 3) as usize;
        [frame.rgb[idx], frame.rgb[idx + 1], frame.rgb[idx + 2]]
    }

    #[test]
    fn keypoints_are_stamped_in_their_color() {
        let mut frame = black_frame(20, 20);
        let mut pose = HumanPose::empty(1.0);
        pose.keypoints[0] = Keypoint::new(10.0, 10.0);

        render_human_pose(&[pose], &mut frame);
        assert_eq!(pixel(&frame, 10, 10), KEYPOINT_COLORS[0]);
        assert_eq!(pixel(&frame, 0, 0), [0, 0, 0]);
    }

    #[test]
    fn limbs_are_blended() {
        let mut frame = black_frame(40, 20);
        let mut pose = HumanPose::empty(1.0);
        pose.keypoints[1] = Keypoint::new(5.0, 10.0);
        pose.keypoints[2] = Keypoint::new(35.0, 10.0);

        render_human_pose(&[pose], &mut frame);
        // Midway along neck -> right shoulder, drawn in the shoulder color at 60%.
        let expected = KEYPOINT_COLORS[2].map(|c| (c as f32 * PANE_WEIGHT).round() as u8);
        assert_eq!(pixel(&frame, 20, 10), expected);
    }

    #[test]
    fn out_of_frame_keypoints_are_clipped() {
        let mut frame = black_frame(8, 8);
        let mut pose = HumanPose::empty(1.0);
        pose.keypoints[1] = Keypoint::new(-50.0, 4.0);
        pose.keypoints[5] = Keypoint::new(500.0, 4.0);

        render_human_pose(&[pose], &mut frame);
        assert_eq!(frame.rgb.len(), Frame::expected_len(8, 8));
    }
}
