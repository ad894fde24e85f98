//! Pair compositing of compressed images.

use crate::runs::SparseBuilder;
use crate::{ColorFormat, DepthFormat, FormatError, PixelLayout, Result, SparseImage};

/// The rule used to combine two overlapping active pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// The pixel with the smaller depth value wins. Requires a depth plane.
    ZBuffer,
    /// Front-to-back premultiplied alpha blending. Requires a color plane.
    /// When a depth plane is present the smaller depth is carried along.
    AlphaBlend,
}

/// Composites `front` over `back` into a new image reusing the capacity of
/// `buf`.
///
/// Both images must share dimensions and plane layout. Pixels active in only
/// one input are copied through; pixels active in neither stay inactive.
/// `front` is the contribution closer to the viewer.
pub fn composite_into(
    front: &SparseImage,
    back: &SparseImage,
    mode: CompositeMode,
    buf: Vec<u8>,
) -> Result<SparseImage> {
    let layout = front.layout();
    if layout != back.layout() {
        return Err(FormatError::LayoutMismatch);
    }
    if front.width() != back.width() || front.height() != back.height() {
        return Err(FormatError::DimensionMismatch);
    }
    match mode {
        CompositeMode::ZBuffer if layout.depth == DepthFormat::None => {
            return Err(FormatError::MissingPlane);
        }
        CompositeMode::AlphaBlend if layout.color == ColorFormat::None => {
            return Err(FormatError::MissingPlane);
        }
        _ => {}
    }

    let frag = layout.fragment_bytes();
    let mut a = front.cursor();
    let mut b = back.cursor();
    let mut builder = SparseBuilder::new(buf, front.width(), front.height(), layout);
    let mut combined = Vec::new();

    loop {
        let step = a.segment_len().min(b.segment_len());
        if step == 0 {
            break;
        }

        match (a.segment_active(), b.segment_active()) {
            (false, false) => {
                a.take(step);
                b.take(step);
                builder.push_inactive(step);
            }
            (true, false) => {
                let (_, n, fragments) = a.take(step);
                b.take(step);
                builder.push_active(n, fragments);
            }
            (false, true) => {
                let (_, n, fragments) = b.take(step);
                a.take(step);
                builder.push_active(n, fragments);
            }
            (true, true) => {
                let (_, n, front_frags) = a.take(step);
                let (_, _, back_frags) = b.take(step);
                combined.clear();
                for i in 0..n {
                    combine_fragment(
                        mode,
                        layout,
                        &front_frags[i * frag..(i + 1) * frag],
                        &back_frags[i * frag..(i + 1) * frag],
                        &mut combined,
                    );
                }
                builder.push_active(n, &combined);
            }
        }
    }

    Ok(builder.finish())
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn combine_fragment(
    mode: CompositeMode,
    layout: PixelLayout,
    front: &[u8],
    back: &[u8],
    out: &mut Vec<u8>,
) {
    match mode {
        CompositeMode::ZBuffer => {
            // Ties go to the front image, keeping the composite order stable.
            let at = layout.color_bytes();
            if read_f32(front, at) <= read_f32(back, at) {
                out.extend_from_slice(front);
            } else {
                out.extend_from_slice(back);
            }
        }
        CompositeMode::AlphaBlend => {
            match layout.color {
                ColorFormat::RgbaU8 => {
                    let remainder = 255 - front[3] as u32;
                    for c in 0..4 {
                        let blended =
                            front[c] as u32 + (back[c] as u32 * remainder + 127) / 255;
                        out.push(blended.min(255) as u8);
                    }
                }
                ColorFormat::RgbaF32 => {
                    let remainder = 1.0 - read_f32(front, 12);
                    for c in 0..4 {
                        let blended = read_f32(front, c * 4) + read_f32(back, c * 4) * remainder;
                        out.extend_from_slice(&blended.to_le_bytes());
                    }
                }
                ColorFormat::None => unreachable!("blending is rejected without a color plane"),
            }
            if layout.depth == DepthFormat::F32 {
                let at = layout.color_bytes();
                let depth = read_f32(front, at).min(read_f32(back, at));
                out.extend_from_slice(&depth.to_le_bytes());
            }
        }
    }
}
