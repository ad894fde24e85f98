/*!
Run-length encoded sparse images for sort-last parallel compositing.

A [`SparseImage`] stores only the "active" pixels of a rendered image (the
pixels a renderer actually touched) as runs of inactive/active counts over a
framed byte buffer. The framing is stable, so a sparse image can be handed to
a byte-oriented transport as-is ([`SparseImage::as_bytes`]) and reconstructed
on the receiving side without copying ([`SparseImage::from_bytes`]).

On top of the format this crate implements the pixel-level operations a
parallel compositor needs:

- pair compositing of two compressed images ([`composite_into`]), either by
  depth test or by front-to-back alpha blending;
- partitioning an image into sub-images along pixel order
  ([`SparseImage::split_into`]), with deterministic remainder placement so
  that recursive splits agree with a flat division of the original image;
- interlacing ([`SparseImage::interlaced`]), a permutation of the pixels that
  makes every eventual partition a contiguous stripe of the original;
- conversion to and from flat [`Image`] buffers ([`compress`],
  [`SparseImage::decompress_into`]).

## Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod composite;
mod image;
mod runs;
mod sparse;
mod split;

pub use composite::{CompositeMode, composite_into};
pub use image::{Image, compress, compress_sub_image};
pub use sparse::SparseImage;
pub use split::{interlace_offset, split_partition_num_pixels};

/// A specialized Result type for sparse image operations.
pub type Result<T> = core::result::Result<T, FormatError>;

/// The color plane layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// No color plane.
    None,
    /// 8-bit RGBA, 4 bytes per pixel.
    RgbaU8,
    /// 32-bit float RGBA, 16 bytes per pixel.
    RgbaF32,
}

impl ColorFormat {
    /// Bytes one pixel occupies in this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::None => 0,
            Self::RgbaU8 => 4,
            Self::RgbaF32 => 16,
        }
    }

    fn to_tag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::RgbaU8 => 1,
            Self::RgbaF32 => 2,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::RgbaU8),
            2 => Some(Self::RgbaF32),
            _ => None,
        }
    }
}

/// The depth plane layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFormat {
    /// No depth plane.
    None,
    /// 32-bit float depth, 4 bytes per pixel.
    F32,
}

impl DepthFormat {
    /// Bytes one pixel occupies in this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::None => 0,
            Self::F32 => 4,
        }
    }

    fn to_tag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::F32 => 1,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::F32),
            _ => None,
        }
    }
}

/// The plane layout of an image: which color and depth formats it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// Format of the color plane.
    pub color: ColorFormat,
    /// Format of the depth plane.
    pub depth: DepthFormat,
}

impl PixelLayout {
    /// 8-bit RGBA color with a float depth plane.
    pub const RGBA_U8_DEPTH: Self = Self {
        color: ColorFormat::RgbaU8,
        depth: DepthFormat::F32,
    };

    /// 8-bit RGBA color without depth.
    pub const RGBA_U8: Self = Self {
        color: ColorFormat::RgbaU8,
        depth: DepthFormat::None,
    };

    /// Float RGBA color without depth.
    pub const RGBA_F32: Self = Self {
        color: ColorFormat::RgbaF32,
        depth: DepthFormat::None,
    };

    /// Bytes of color data per pixel.
    pub fn color_bytes(self) -> usize {
        self.color.bytes_per_pixel()
    }

    /// Bytes of depth data per pixel.
    pub fn depth_bytes(self) -> usize {
        self.depth.bytes_per_pixel()
    }

    /// Bytes one active-pixel fragment (color followed by depth) occupies.
    pub fn fragment_bytes(self) -> usize {
        self.color_bytes() + self.depth_bytes()
    }
}

/// An error raised when a byte buffer does not hold a valid sparse image, or
/// when images with incompatible shapes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer does not start with the sparse image magic.
    BadMagic,
    /// The buffer ends before the declared payload does.
    Truncated,
    /// A format tag in the header is not a known value.
    UnknownFormat,
    /// The run records do not cover the declared pixel count.
    PixelCountMismatch {
        /// Pixels declared in the header.
        declared: u64,
        /// Pixels actually covered by the run records.
        covered: u64,
    },
    /// Two images that must share a plane layout do not.
    LayoutMismatch,
    /// Two images that must share dimensions do not.
    DimensionMismatch,
    /// The requested operation needs a plane the layout does not carry.
    MissingPlane,
}

impl core::fmt::Display for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadMagic => write!(f, "buffer is not a sparse image"),
            Self::Truncated => write!(f, "sparse image buffer is truncated"),
            Self::UnknownFormat => write!(f, "unknown color or depth format tag"),
            Self::PixelCountMismatch { declared, covered } => write!(
                f,
                "run records cover {covered} pixels but the header declares {declared}"
            ),
            Self::LayoutMismatch => write!(f, "images have different plane layouts"),
            Self::DimensionMismatch => write!(f, "images have different dimensions"),
            Self::MissingPlane => write!(f, "operation requires a plane the image does not carry"),
        }
    }
}

impl core::error::Error for FormatError {}
