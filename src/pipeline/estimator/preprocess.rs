use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use super::EstimatorConfig;
use crate::types::Frame;

/// How the frame was mapped into the network input. Padding is added on the
/// right and bottom only.
#[derive(Clone, Debug, PartialEq)]
pub struct InputGeometry {
    pub orig_w: u32,
    pub orig_h: u32,
    pub resized_w: u32,
    pub resized_h: u32,
    pub padded_w: u32,
    pub padded_h: u32,
}

impl InputGeometry {
    pub fn compute(orig_w: u32, orig_h: u32, input_height: u32, stride: u32) -> Self {
        let scale = input_height as f64 / orig_h.max(1) as f64;
        let resized_w = ((orig_w as f64 * scale).round() as u32).max(1);
        let resized_h = input_height.max(1);
        Self {
            orig_w,
            orig_h,
            resized_w,
            resized_h,
            padded_w: round_up(resized_w, stride),
            padded_h: round_up(resized_h, stride),
        }
    }

    pub fn pad_right(&self) -> u32 {
        self.padded_w - self.resized_w
    }

    pub fn pad_bottom(&self) -> u32 {
        self.padded_h - self.resized_h
    }
}

fn round_up(value: u32, multiple: u32) -> u32 {
    let multiple = multiple.max(1);
    value.div_ceil(multiple) * multiple
}

/// Resizes to the network height, pads to a stride multiple and lays the
/// pixels out as a normalized NCHW tensor in BGR channel order.
pub fn prepare_input(frame: &Frame, cfg: &EstimatorConfig) -> Result<(Array4<f32>, InputGeometry)> {
    let expected_len = Frame::expected_len(frame.width, frame.height);
    if frame.rgb.len() != expected_len || frame.is_empty() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            expected_len
        ));
    }

    let geometry = InputGeometry::compute(frame.width, frame.height, cfg.input_height, cfg.stride);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgb.clone(),
        fir::PixelType::U8x3,
    )?;
    let mut dst_image =
        fir::images::Image::new(geometry.resized_w, geometry.resized_h, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let padded_w = geometry.padded_w as usize;
    let padded_h = geometry.padded_h as usize;
    let resized_w = geometry.resized_w as usize;
    let resized_h = geometry.resized_h as usize;
    let plane = padded_w * padded_h;
    let pad = normalize(cfg.pad_value, cfg);

    let mut data = vec![pad; plane * 3];
    // BGR planes: output channel c reads RGB channel 2 - c.
    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(channel, out)| {
            let src_channel = 2 - channel;
            for y in 0..resized_h {
                let row = &resized[y * resized_w * 3..(y + 1) * resized_w * 3];
                let out_row = &mut out[y * padded_w..y * padded_w + resized_w];
                for (dst, px) in out_row.iter_mut().zip(row.chunks_exact(3)) {
                    *dst = normalize(px[src_channel], cfg);
                }
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, 3, padded_h, padded_w), data)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((input, geometry))
}

fn normalize(value: u8, cfg: &EstimatorConfig) -> f32 {
    (value as f32 - cfg.mean) * cfg.scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_scales_to_network_height_and_pads_to_stride() {
        let geometry = InputGeometry::compute(1280, 720, 256, 8);
        assert_eq!(geometry.resized_h, 256);
        assert_eq!(geometry.resized_w, 455);
        assert_eq!(geometry.padded_w, 456);
        assert_eq!(geometry.padded_h, 256);
        assert_eq!(geometry.pad_right(), 1);
        assert_eq!(geometry.pad_bottom(), 0);
    }

    #[test]
    fn tensor_is_bgr_nchw_with_mean_padding() {
        let cfg = EstimatorConfig {
            input_height: 8,
            ..EstimatorConfig::default()
        };
        // 10x8 solid red frame resizes to 10x8 and pads to 16x8.
        let frame = Frame::new([255u8, 0, 0].repeat(10 * 8), 10, 8);
        let (input, geometry) = prepare_input(&frame, &cfg).unwrap();

        assert_eq!(input.shape(), &[1, 3, 8, 16]);
        assert_eq!(geometry.pad_right(), 6);

        let red = (255.0 - cfg.mean) * cfg.scale;
        let zero = (0.0 - cfg.mean) * cfg.scale;
        assert!((input[[0, 2, 4, 4]] - red).abs() < 1e-3);
        assert!((input[[0, 0, 4, 4]] - zero).abs() < 1e-3);
        // Padding holds the mean value, which normalizes to zero.
        assert_eq!(input[[0, 1, 4, 12]], 0.0);
    }

    #[test]
    fn rejects_truncated_frames() {
        let frame = Frame::new(vec![0; 5], 2, 2);
        assert!(prepare_input(&frame, &EstimatorConfig::default()).is_err());
    }
}
