use image::RgbImage;

/// Dense per-pixel tensor in row-major order.
///
/// Every pixel carries `channels` values stored contiguously. Images enter
/// the criterion tree as a 3-channel tensor with values in `[0, 1]`; leaf
/// criteria emit one channel per class with values in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    /// Converts an RGB image to a 3-channel tensor normalized to `[0, 1]`.
    #[must_use]
    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image
            .as_raw()
            .iter()
            .map(|&v| f32::from(v) / 255.0)
            .collect();
        Self {
            width: width as usize,
            height: height as usize,
            channels: 3,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[must_use]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Values of the pixel at (`x`, `y`).
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = self.offset(x, y);
        &self.data[start..start + self.channels]
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f32] {
        let start = self.offset(x, y);
        &mut self.data[start..start + self.channels]
    }

    /// Values of the pixel with row-major index `index`.
    #[must_use]
    pub fn pixel_at(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn pixel_at_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Iterates over pixels in row-major order.
    pub fn pixels(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.channels.max(1)).take(self.area())
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        (y * self.width + x) * self.channels
    }
}
