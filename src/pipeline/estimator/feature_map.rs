use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::{ArrayViewD, Axis};

/// A single-channel float map (heatmap or one PAF component), row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(anyhow!(
                "feature map size mismatch: got {}, expected {}x{}",
                data.len(),
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[cfg(test)]
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn at(&self, x: i32, y: i32) -> f32 {
        let cx = x.clamp(0, self.width as i32 - 1) as usize;
        let cy = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[cy * self.width as usize + cx]
    }

    #[cfg(test)]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    /// Bicubic upsampling by an integer ratio.
    pub fn upsample(&self, ratio: u32) -> Result<FeatureMap> {
        if ratio <= 1 {
            return Ok(self.clone());
        }

        let bytes: Vec<u8> = self.data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let src_image =
            fir::images::Image::from_vec_u8(self.width, self.height, bytes, fir::PixelType::F32)?;
        let mut dst_image =
            fir::images::Image::new(self.width * ratio, self.height * ratio, fir::PixelType::F32);
        let mut resizer = fir::Resizer::new();
        let resize_options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
        resizer
            .resize(&src_image, &mut dst_image, Some(&resize_options))
            .context("feature map resize failed")?;

        let data = dst_image
            .into_vec()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        FeatureMap::new(self.width * ratio, self.height * ratio, data)
    }
}

/// Splits a `[1, C, H, W]` network output into `C` maps.
pub fn split_channels(output: &ArrayViewD<'_, f32>) -> Result<Vec<FeatureMap>> {
    let shape = output.shape();
    if shape.len() != 4 || shape[0] < 1 {
        return Err(anyhow!(
            "unexpected output shape {:?}, need [1, channels, height, width]",
            shape
        ));
    }
    let (height, width) = (shape[2] as u32, shape[3] as u32);
    let batch = output.index_axis(Axis(0), 0);

    batch
        .outer_iter()
        .map(|channel| FeatureMap::new(width, height, channel.iter().copied().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn splits_nchw_output() {
        let array = Array4::from_shape_fn((1, 2, 2, 3), |(_, c, y, x)| (c * 100 + y * 10 + x) as f32);
        let maps = split_channels(&array.into_dyn().view()).unwrap();

        assert_eq!(maps.len(), 2);
        assert_eq!((maps[1].width, maps[1].height), (3, 2));
        assert_eq!(maps[1].at(2, 1), 112.0);
        assert_eq!(maps[0].at(0, 0), 0.0);
    }

    #[test]
    fn at_clamps_to_border() {
        let map = FeatureMap::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(map.at(-5, 0), 1.0);
        assert_eq!(map.at(9, 9), 4.0);
    }

    #[test]
    fn upsampling_keeps_constant_maps_constant() {
        let map = FeatureMap::filled(4, 3, -0.5);
        let up = map.upsample(4).unwrap();
        assert_eq!((up.width, up.height), (16, 12));
        assert!(up.data.iter().all(|v| (v + 0.5).abs() < 1e-4));
    }
}
