//! The framed sparse image buffer.

use crate::runs::{PixelCursor, RunIter, SparseBuilder, validate_payload};
use crate::{ColorFormat, DepthFormat, FormatError, Image, PixelLayout, Result};

pub(crate) const MAGIC: u32 = u32::from_le_bytes(*b"tesp");

// Header words: magic, color format, depth format, width, height, pixel
// count, payload byte length. All little-endian u32.
pub(crate) const HEADER_LEN: usize = 28;
const WORD_MAGIC: usize = 0;
const WORD_COLOR: usize = 1;
const WORD_DEPTH: usize = 2;
const WORD_WIDTH: usize = 3;
const WORD_HEIGHT: usize = 4;
const WORD_NUM_PIXELS: usize = 5;
const WORD_PAYLOAD_LEN: usize = 6;

/// A compressed image: run-length encoded active pixels over a framed byte
/// buffer.
///
/// The buffer layout is stable. [`SparseImage::as_bytes`] yields the exact
/// bytes to hand to a transport and [`SparseImage::from_bytes`] reconstructs
/// an image from received bytes without copying the payload.
#[derive(Debug, Clone)]
pub struct SparseImage {
    buf: Vec<u8>,
}

pub(crate) fn read_word(buf: &[u8], word: usize) -> u32 {
    let at = word * 4;
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn write_word(buf: &mut [u8], word: usize, value: u32) {
    let at = word * 4;
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_header(buf: &mut Vec<u8>, width: u32, height: u32, layout: PixelLayout) {
    debug_assert!(buf.is_empty());
    buf.resize(HEADER_LEN, 0);
    write_word(buf, WORD_MAGIC, MAGIC);
    write_word(buf, WORD_COLOR, layout.color.to_tag());
    write_word(buf, WORD_DEPTH, layout.depth.to_tag());
    write_word(buf, WORD_WIDTH, width);
    write_word(buf, WORD_HEIGHT, height);
    write_word(buf, WORD_NUM_PIXELS, width * height);
    write_word(buf, WORD_PAYLOAD_LEN, 0);
}

pub(crate) fn patch_payload_len(buf: &mut [u8]) {
    let len = (buf.len() - HEADER_LEN) as u32;
    write_word(buf, WORD_PAYLOAD_LEN, len);
}

impl SparseImage {
    /// An image of the given dimensions with zero active pixels.
    pub fn blank(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self::blank_in(Vec::new(), width, height, layout)
    }

    /// Like [`SparseImage::blank`], reusing the capacity of `buf`.
    pub fn blank_in(buf: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        let mut builder = SparseBuilder::new(buf, width, height, layout);
        builder.push_inactive((width as usize) * (height as usize));
        builder.finish()
    }

    pub(crate) fn from_validated(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    /// The number of bytes a sparse image of `num_pixels` pixels can occupy
    /// in the worst case.
    ///
    /// The worst case is alternating single active and inactive pixels, which
    /// maximizes the number of run records.
    pub fn buffer_size(num_pixels: usize, layout: PixelLayout) -> usize {
        HEADER_LEN + 8 * (num_pixels / 2 + 1) + num_pixels * layout.fragment_bytes()
    }

    /// Width of the image in pixels.
    pub fn width(&self) -> u32 {
        read_word(&self.buf, WORD_WIDTH)
    }

    /// Height of the image in pixels.
    pub fn height(&self) -> u32 {
        read_word(&self.buf, WORD_HEIGHT)
    }

    /// Total number of pixels, active or not.
    pub fn num_pixels(&self) -> usize {
        read_word(&self.buf, WORD_NUM_PIXELS) as usize
    }

    /// The plane layout of the image.
    pub fn layout(&self) -> PixelLayout {
        PixelLayout {
            color: ColorFormat::from_tag(read_word(&self.buf, WORD_COLOR)).unwrap(),
            depth: DepthFormat::from_tag(read_word(&self.buf, WORD_DEPTH)).unwrap(),
        }
    }

    /// The number of active pixels.
    pub fn active_pixels(&self) -> usize {
        self.runs().map(|run| run.active).sum()
    }

    /// The framed bytes of the image, ready to hand to a transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the image, returning its backing buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Reconstructs an image from bytes produced by [`SparseImage::as_bytes`].
    ///
    /// The buffer may carry trailing slack past the declared payload (a
    /// transport may deliver into a buffer sized for the worst case); the
    /// slack is ignored. The framing is fully validated: a malformed buffer
    /// is an error, never a mis-read.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::Truncated);
        }

        if read_word(&buf, WORD_MAGIC) != MAGIC {
            return Err(FormatError::BadMagic);
        }

        let color =
            ColorFormat::from_tag(read_word(&buf, WORD_COLOR)).ok_or(FormatError::UnknownFormat)?;
        let depth =
            DepthFormat::from_tag(read_word(&buf, WORD_DEPTH)).ok_or(FormatError::UnknownFormat)?;
        let layout = PixelLayout { color, depth };

        let width = read_word(&buf, WORD_WIDTH) as u64;
        let height = read_word(&buf, WORD_HEIGHT) as u64;
        let declared = read_word(&buf, WORD_NUM_PIXELS) as u64;
        if width * height != declared {
            return Err(FormatError::PixelCountMismatch {
                declared,
                covered: width * height,
            });
        }

        let payload_len = read_word(&buf, WORD_PAYLOAD_LEN) as usize;
        let end = HEADER_LEN
            .checked_add(payload_len)
            .ok_or(FormatError::Truncated)?;
        if buf.len() < end {
            return Err(FormatError::Truncated);
        }

        validate_payload(&buf[HEADER_LEN..end], layout.fragment_bytes(), declared)?;

        let mut buf = buf;
        buf.truncate(end);
        Ok(Self { buf })
    }

    pub(crate) fn payload(&self) -> &[u8] {
        let len = read_word(&self.buf, WORD_PAYLOAD_LEN) as usize;
        &self.buf[HEADER_LEN..HEADER_LEN + len]
    }

    pub(crate) fn runs(&self) -> RunIter<'_> {
        RunIter::new(self.payload(), self.layout().fragment_bytes())
    }

    pub(crate) fn cursor(&self) -> PixelCursor<'_> {
        PixelCursor::new(self.payload(), self.layout().fragment_bytes())
    }

    /// Expands the image into `out` starting at pixel `offset`.
    ///
    /// Active pixels overwrite the corresponding pixel of `out`; inactive
    /// pixels become background (transparent black, depth 1.0). Pixels of
    /// `out` outside `[offset, offset + num_pixels)` are untouched.
    pub fn decompress_into(&self, out: &mut Image, offset: usize) -> Result<()> {
        if self.layout() != out.layout() {
            return Err(FormatError::LayoutMismatch);
        }
        if offset + self.num_pixels() > out.num_pixels() {
            return Err(FormatError::DimensionMismatch);
        }

        let mut at = offset;
        for run in self.runs() {
            out.clear_range(at, run.inactive);
            at += run.inactive;
            out.write_fragments(at, run.active, run.fragments);
            at += run.active;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelLayout;

    #[test]
    fn blank_has_no_active_pixels() {
        let img = SparseImage::blank(8, 4, PixelLayout::RGBA_U8_DEPTH);
        assert_eq!(img.width(), 8);
        assert_eq!(img.height(), 4);
        assert_eq!(img.num_pixels(), 32);
        assert_eq!(img.active_pixels(), 0);
    }

    #[test]
    fn package_roundtrip() {
        let img = SparseImage::blank(16, 2, PixelLayout::RGBA_U8);
        let bytes = img.as_bytes().to_vec();
        let back = SparseImage::from_bytes(bytes).unwrap();
        assert_eq!(back.width(), 16);
        assert_eq!(back.height(), 2);
        assert_eq!(back.num_pixels(), 32);
        assert_eq!(back.layout(), PixelLayout::RGBA_U8);
    }

    #[test]
    fn from_bytes_ignores_trailing_slack() {
        let img = SparseImage::blank(4, 4, PixelLayout::RGBA_U8);
        let mut bytes = img.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xAB; 64]);
        let back = SparseImage::from_bytes(bytes).unwrap();
        assert_eq!(back.num_pixels(), 16);
        assert_eq!(back.as_bytes(), img.as_bytes());
    }

    #[test]
    fn from_bytes_rejects_bad_magic() {
        let img = SparseImage::blank(4, 4, PixelLayout::RGBA_U8);
        let mut bytes = img.as_bytes().to_vec();
        bytes[0] ^= 0xFF;
        assert_eq!(
            SparseImage::from_bytes(bytes).unwrap_err(),
            FormatError::BadMagic
        );
    }

    #[test]
    fn from_bytes_rejects_truncation() {
        let img = SparseImage::blank(4, 4, PixelLayout::RGBA_U8);
        let bytes = img.as_bytes()[..HEADER_LEN + 2].to_vec();
        assert_eq!(
            SparseImage::from_bytes(bytes).unwrap_err(),
            FormatError::Truncated
        );
    }

    #[test]
    fn random_images_stay_under_the_size_bound_and_roundtrip() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let layout = PixelLayout::RGBA_U8_DEPTH;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..32 {
            let width = rng.gen_range(1..=64_u32);
            let height = rng.gen_range(1..=8_u32);
            let mut image = crate::Image::new(width, height, layout);
            for p in 0..image.num_pixels() {
                if rng.gen_bool(0.6) {
                    let color = [rng.r#gen(), rng.r#gen(), rng.r#gen(), rng.r#gen()];
                    image.color_plane_mut()[p * 4..p * 4 + 4].copy_from_slice(&color);
                    image.depth_plane_mut()[p] = rng.gen_range(0.0..1.0);
                }
            }

            let sparse = crate::compress(&image);
            assert!(
                sparse.as_bytes().len()
                    <= SparseImage::buffer_size(image.num_pixels(), layout)
            );

            let wire = SparseImage::from_bytes(sparse.as_bytes().to_vec()).unwrap();
            let mut out = crate::Image::new(width, height, layout);
            wire.decompress_into(&mut out, 0).unwrap();
            assert_eq!(out, image);
        }
    }

    #[test]
    fn buffer_size_covers_worst_case() {
        // Alternating active/inactive pixels produce the most run records.
        let layout = PixelLayout::RGBA_U8_DEPTH;
        for n in [0usize, 1, 2, 7, 64, 101] {
            let mut img = crate::Image::new(n as u32, 1, layout);
            for p in (0..n).step_by(2) {
                img.write_fragments(p, 1, &[1, 2, 3, 4, 0, 0, 0, 0]);
            }
            let sparse = crate::compress(&img);
            assert!(sparse.as_bytes().len() <= SparseImage::buffer_size(n, layout));
        }
    }
}
