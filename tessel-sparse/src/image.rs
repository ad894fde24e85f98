//! Flat (uncompressed) image buffers.

use crate::runs::SparseBuilder;
use crate::{ColorFormat, DepthFormat, PixelLayout, SparseImage};

/// Depth value written for pixels no renderer touched.
pub(crate) const BACKGROUND_DEPTH: f32 = 1.0;

/// A flat image: contiguous color and depth planes.
///
/// This is the shape compositing results are collected into, and the shape
/// renderers produce before compression. The color plane is raw bytes in the
/// declared [`ColorFormat`]; the depth plane is `f32` values where smaller
/// means closer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    color: Vec<u8>,
    depth: Vec<f32>,
}

impl Image {
    /// A background-cleared image of the given dimensions.
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        let mut image = Self {
            width: 0,
            height: 0,
            layout,
            color: Vec::new(),
            depth: Vec::new(),
        };
        image.set_dimensions(width, height);
        image
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of pixels.
    pub fn num_pixels(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// The plane layout of the image.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// The color plane as raw bytes, `color_bytes()` per pixel.
    pub fn color_plane(&self) -> &[u8] {
        &self.color
    }

    /// Mutable access to the color plane.
    pub fn color_plane_mut(&mut self) -> &mut [u8] {
        &mut self.color
    }

    /// The depth plane, one `f32` per pixel.
    pub fn depth_plane(&self) -> &[f32] {
        &self.depth
    }

    /// Mutable access to the depth plane.
    pub fn depth_plane_mut(&mut self) -> &mut [f32] {
        &mut self.depth
    }

    /// The depth plane viewed as little-endian bytes.
    pub fn depth_plane_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.depth)
    }

    /// Mutable byte view of the depth plane.
    pub fn depth_plane_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.depth)
    }

    /// Resizes the image and clears it to background.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        let pixels = (width as usize) * (height as usize);
        self.width = width;
        self.height = height;
        self.color.resize(pixels * self.layout.color_bytes(), 0);
        self.depth.resize(pixels, BACKGROUND_DEPTH);
        self.clear();
    }

    /// Clears every pixel to background: transparent black color, depth 1.0.
    pub fn clear(&mut self) {
        self.color.fill(0);
        self.depth.fill(BACKGROUND_DEPTH);
    }

    pub(crate) fn clear_range(&mut self, at: usize, count: usize) {
        let cb = self.layout.color_bytes();
        self.color[at * cb..(at + count) * cb].fill(0);
        if self.layout.depth != DepthFormat::None {
            self.depth[at..at + count].fill(BACKGROUND_DEPTH);
        }
    }

    /// Writes `count` fragments (color then depth bytes per pixel) starting
    /// at pixel `at`.
    pub(crate) fn write_fragments(&mut self, at: usize, count: usize, fragments: &[u8]) {
        let cb = self.layout.color_bytes();
        let db = self.layout.depth_bytes();
        debug_assert_eq!(fragments.len(), count * (cb + db));

        for (i, fragment) in fragments.chunks_exact(cb + db).enumerate() {
            let pixel = at + i;
            self.color[pixel * cb..(pixel + 1) * cb].copy_from_slice(&fragment[..cb]);
            if db != 0 {
                self.depth[pixel] = f32::from_le_bytes(fragment[cb..].try_into().unwrap());
            }
        }
    }

    fn read_fragment(&self, pixel: usize, out: &mut Vec<u8>) {
        let cb = self.layout.color_bytes();
        out.extend_from_slice(&self.color[pixel * cb..(pixel + 1) * cb]);
        if self.layout.depth != DepthFormat::None {
            out.extend_from_slice(&self.depth[pixel].to_le_bytes());
        }
    }

    /// Whether a renderer touched this pixel: its depth is in front of the
    /// background, or, lacking a depth plane, its alpha is not zero.
    fn pixel_active(&self, pixel: usize) -> bool {
        match self.layout.depth {
            DepthFormat::F32 => self.depth[pixel] < BACKGROUND_DEPTH,
            DepthFormat::None => match self.layout.color {
                ColorFormat::RgbaU8 => self.color[pixel * 4 + 3] != 0,
                ColorFormat::RgbaF32 => {
                    let at = pixel * 16 + 12;
                    f32::from_le_bytes(self.color[at..at + 4].try_into().unwrap()) != 0.0
                }
                ColorFormat::None => false,
            },
        }
    }
}

/// Compresses a whole image into a sparse one.
pub fn compress(image: &Image) -> SparseImage {
    compress_sub_image(image, 0, image.num_pixels())
}

/// Compresses `num_pixels` pixels of `image` starting at `offset` into a
/// sparse image of dimensions `(num_pixels, 1)`.
pub fn compress_sub_image(image: &Image, offset: usize, num_pixels: usize) -> SparseImage {
    assert!(offset + num_pixels <= image.num_pixels());

    let mut builder = SparseBuilder::new(Vec::new(), num_pixels as u32, 1, image.layout());
    let mut fragment = Vec::with_capacity(image.layout().fragment_bytes());

    let mut pixel = offset;
    let end = offset + num_pixels;
    while pixel < end {
        if image.pixel_active(pixel) {
            fragment.clear();
            image.read_fragment(pixel, &mut fragment);
            builder.push_active(1, &fragment);
            pixel += 1;
        } else {
            let start = pixel;
            while pixel < end && !image.pixel_active(pixel) {
                pixel += 1;
            }
            builder.push_inactive(pixel - start);
        }
    }

    builder.finish()
}
