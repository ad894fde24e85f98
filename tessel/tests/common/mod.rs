//! Shared helpers: thread-per-rank worlds and deterministic test images.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use tessel::comm::LocalComm;
use tessel::sparse::{
    CompositeMode, Image, PixelLayout, SparseImage, composite_into, compress,
};

/// Runs `body` once per rank of a `size`-process world, each on its own
/// thread over a [`LocalComm`] mesh, and returns the results in rank order.
pub fn run_world<T: Send + 'static>(
    size: usize,
    body: impl Fn(&mut LocalComm) -> T + Send + Sync + 'static,
) -> Vec<T> {
    let body = Arc::new(body);
    let handles: Vec<_> = LocalComm::mesh(size)
        .into_iter()
        .map(|mut comm| {
            let body = Arc::clone(&body);
            thread::spawn(move || body(&mut comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// A deterministic depth-buffered image for `rank`: pixel `p` is active
/// unless `(rank + p) % 3 == 0`, with a depth that never collides with
/// another rank's at the same pixel.
pub fn depth_image(rank: usize, width: u32, height: u32) -> SparseImage {
    let num_pixels = (width as usize) * (height as usize);
    let mut image = Image::new(width, height, PixelLayout::RGBA_U8_DEPTH);
    for p in 0..num_pixels {
        if (rank + p) % 3 == 0 {
            continue;
        }
        image.color_plane_mut()[p * 4..p * 4 + 4].copy_from_slice(&[
            rank as u8,
            p as u8,
            (p >> 8) as u8,
            255,
        ]);
        image.depth_plane_mut()[p] = ((rank * 31 + p * 17) % 97) as f32 / 200.0;
    }
    compress(&image)
}

/// A deterministic blending image for `rank`: dyadic colors and alpha 0.5,
/// so that front-to-back blending is exact in f32 and byte-comparable no
/// matter how the folds associate.
pub fn blend_image(rank: usize, width: u32, height: u32) -> SparseImage {
    let num_pixels = (width as usize) * (height as usize);
    let mut image = Image::new(width, height, PixelLayout::RGBA_F32);
    for p in 0..num_pixels {
        if (rank + p) % 4 == 0 {
            continue;
        }
        let color = [
            (rank + 1) as f32 * 0.03125,
            (p % 16) as f32 * 0.015625,
            0.25,
            0.5,
        ];
        let at = p * 16;
        for (c, value) in color.iter().enumerate() {
            image.color_plane_mut()[at + c * 4..at + c * 4 + 4]
                .copy_from_slice(&value.to_le_bytes());
        }
    }
    compress(&image)
}

/// Folds the images front to back with the pair composite and expands the
/// result: what the whole group should collectively end up with.
pub fn reference_composite(images: &[SparseImage], mode: CompositeMode) -> Image {
    let mut iter = images.iter();
    let mut acc = iter.next().unwrap().clone();
    for image in iter {
        acc = composite_into(&acc, image, mode, Vec::new()).unwrap();
    }

    let mut flat = Image::new(acc.width(), acc.height(), acc.layout());
    acc.decompress_into(&mut flat, 0).unwrap();
    flat
}

/// Checks that the reported (offset, size) pairs tile `[0, num_pixels)`
/// exactly, and stitches the partitions into one flat image.
pub fn stitch_partitions(
    partitions: &[(SparseImage, usize)],
    num_pixels: usize,
    layout: PixelLayout,
) -> Image {
    let mut spans: Vec<(usize, usize)> = partitions
        .iter()
        .map(|(piece, offset)| (*offset, piece.num_pixels()))
        .collect();
    spans.sort_unstable();
    let mut expected_start = 0;
    for &(offset, size) in &spans {
        assert_eq!(offset, expected_start, "partitions must tile the image");
        expected_start = offset + size;
    }
    assert_eq!(expected_start, num_pixels);

    let mut flat = Image::new(num_pixels as u32, 1, layout);
    for (piece, offset) in partitions {
        piece.decompress_into(&mut flat, *offset).unwrap();
    }
    flat
}
