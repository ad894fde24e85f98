//! Splitting images along pixel order, and the interlace permutation.

use crate::SparseImage;
use crate::runs::SparseBuilder;

/// The size of the largest piece produced when `num_pixels` pixels are split
/// into `num_partitions` parts that will eventually be split further into
/// `eventual_partitions` parts in total. Used to size receive buffers.
///
/// The remainder is distributed so that recursive splitting agrees with a
/// flat division into `eventual_partitions` parts where the first
/// `num_pixels % eventual_partitions` parts get one extra pixel. Peers of a
/// compositing round can therefore size each other's pieces without
/// exchanging sizes.
pub fn split_partition_num_pixels(
    num_pixels: usize,
    num_partitions: usize,
    eventual_partitions: usize,
) -> usize {
    piece_num_pixels(num_pixels, num_partitions, eventual_partitions, 0)
}

/// The exact size of piece `index` under the same distribution rule.
pub(crate) fn piece_num_pixels(
    num_pixels: usize,
    num_partitions: usize,
    eventual_partitions: usize,
    index: usize,
) -> usize {
    debug_assert_eq!(eventual_partitions % num_partitions, 0);
    let sub = eventual_partitions / num_partitions;
    let remainder = num_pixels % eventual_partitions;
    sub * (num_pixels / eventual_partitions) + remainder.saturating_sub(index * sub).min(sub)
}

impl SparseImage {
    /// Splits the image into `num_partitions` consecutive pieces.
    ///
    /// The pieces tile the image exactly and preserve pixel order. Piece `i`
    /// has `piece_num_pixels(.., i)` pixels and dimensions `(pixels, 1)`.
    /// `offsets` receives each piece's global pixel offset,
    /// `start_offset` being the offset of the image itself within the
    /// logical image it was cut from. Buffers of any images already in
    /// `pieces` are reused.
    pub fn split_into(
        &self,
        start_offset: usize,
        num_partitions: usize,
        eventual_partitions: usize,
        pieces: &mut Vec<SparseImage>,
        offsets: &mut Vec<usize>,
    ) {
        let num_pixels = self.num_pixels();
        let mut spare: Vec<Vec<u8>> = pieces.drain(..).map(SparseImage::into_bytes).collect();
        offsets.clear();

        let mut cursor = self.cursor();
        let mut at = start_offset;
        for i in 0..num_partitions {
            let len = piece_num_pixels(num_pixels, num_partitions, eventual_partitions, i);
            let mut builder = SparseBuilder::new(
                spare.pop().unwrap_or_default(),
                len as u32,
                1,
                self.layout(),
            );

            let mut rest = len;
            while rest > 0 {
                let (active, took, fragments) = cursor.take(rest);
                if active {
                    builder.push_active(took, fragments);
                } else {
                    builder.push_inactive(took);
                }
                rest -= took;
            }

            pieces.push(builder.finish());
            offsets.push(at);
            at += len;
        }
    }

    /// Reorders the image so that each of the `eventual_partitions` parts a
    /// downstream recursive split produces is a contiguous stripe of this
    /// image. [`interlace_offset`] reports where a part's stripe starts.
    /// Reuses the capacity of `buf`.
    pub fn interlaced(&self, eventual_partitions: usize, buf: Vec<u8>) -> SparseImage {
        let mut pieces = Vec::new();
        let mut offsets = Vec::new();
        self.split_into(
            0,
            eventual_partitions,
            eventual_partitions,
            &mut pieces,
            &mut offsets,
        );

        let order = interlace_order(eventual_partitions, self.num_pixels() % eventual_partitions);
        let mut builder = SparseBuilder::new(buf, self.width(), self.height(), self.layout());
        for &source in &order {
            let mut cursor = pieces[source].cursor();
            loop {
                let (active, took, fragments) = cursor.take(usize::MAX);
                if took == 0 {
                    break;
                }
                if active {
                    builder.push_active(took, fragments);
                } else {
                    builder.push_inactive(took);
                }
            }
        }
        builder.finish()
    }
}

/// The pixel offset, in the original image, of the stripe that partition
/// `partition` of the interlaced image carries.
pub fn interlace_offset(partition: usize, eventual_partitions: usize, num_pixels: usize) -> usize {
    let order = interlace_order(eventual_partitions, num_pixels % eventual_partitions);
    let source = order[partition];
    source * (num_pixels / eventual_partitions) + source.min(num_pixels % eventual_partitions)
}

/// The permutation behind [`SparseImage::interlaced`]: slot `q` of the
/// interlaced image holds source partition `order[q]`.
///
/// The base shuffle is a bit reversal over the next power of two, skipping
/// out-of-range values. Source partitions carrying a remainder pixel are
/// then kept in the leading slots so that slot sizes always match source
/// sizes, whatever the remainder.
fn interlace_order(eventual_partitions: usize, remainder: usize) -> Vec<usize> {
    if eventual_partitions <= 1 {
        return vec![0; eventual_partitions];
    }

    let bits = usize::BITS - (eventual_partitions - 1).leading_zeros();
    let reversed = (0..1_usize << bits)
        .map(move |q| q.reverse_bits() >> (usize::BITS - bits))
        .filter(|&q| q < eventual_partitions);

    let mut order: Vec<usize> = reversed.clone().filter(|&q| q < remainder).collect();
    order.extend(reversed.filter(|&q| q >= remainder));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Image, PixelLayout, compress};

    fn indexed_image(num_pixels: usize) -> SparseImage {
        let mut image = Image::new(num_pixels as u32, 1, PixelLayout::RGBA_U8_DEPTH);
        for p in 0..num_pixels {
            image.color_plane_mut()[p * 4..p * 4 + 4]
                .copy_from_slice(&[p as u8, (p >> 8) as u8, 1, 255]);
            image.depth_plane_mut()[p] = 0.25;
        }
        compress(&image)
    }

    #[test]
    fn even_split_sizes_and_offsets() {
        let img = indexed_image(100);
        let mut pieces = Vec::new();
        let mut offsets = Vec::new();
        img.split_into(0, 4, 4, &mut pieces, &mut offsets);

        let sizes: Vec<_> = pieces.iter().map(SparseImage::num_pixels).collect();
        assert_eq!(sizes, vec![25, 25, 25, 25]);
        assert_eq!(offsets, vec![0, 25, 50, 75]);
    }

    #[test]
    fn remainder_goes_to_the_leading_pieces() {
        assert_eq!(piece_num_pixels(10, 3, 3, 0), 4);
        assert_eq!(piece_num_pixels(10, 3, 3, 1), 3);
        assert_eq!(piece_num_pixels(10, 3, 3, 2), 3);
        assert_eq!(split_partition_num_pixels(10, 3, 3), 4);
    }

    #[test]
    fn recursive_split_matches_flat_division() {
        // 103 pixels over the factorization [2, 2]: the four pieces after two
        // rounds of splitting must equal the flat division into 4.
        let flat: Vec<usize> = (0..4).map(|i| piece_num_pixels(103, 4, 4, i)).collect();
        assert_eq!(flat, vec![26, 26, 26, 25]);

        let mut nested = Vec::new();
        for i in 0..2 {
            let first = piece_num_pixels(103, 2, 4, i);
            for j in 0..2 {
                nested.push(piece_num_pixels(first, 2, 2, j));
            }
        }
        assert_eq!(nested, flat);
    }

    #[test]
    fn split_pieces_tile_the_image() {
        let img = indexed_image(37);
        let mut pieces = Vec::new();
        let mut offsets = Vec::new();
        img.split_into(0, 3, 3, &mut pieces, &mut offsets);

        let mut out = Image::new(37, 1, PixelLayout::RGBA_U8_DEPTH);
        for (piece, &offset) in pieces.iter().zip(&offsets) {
            piece.decompress_into(&mut out, offset).unwrap();
        }

        let mut original = Image::new(37, 1, PixelLayout::RGBA_U8_DEPTH);
        img.decompress_into(&mut original, 0).unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn interlace_order_is_a_class_preserving_permutation() {
        for (eventual, remainder) in [(4, 0), (8, 3), (13, 5), (16, 15), (1, 0)] {
            let order = interlace_order(eventual, remainder);
            let mut seen = order.clone();
            seen.sort_unstable();
            assert_eq!(seen, (0..eventual).collect::<Vec<_>>());
            for (slot, &source) in order.iter().enumerate() {
                assert_eq!(slot < remainder, source < remainder);
            }
        }
    }

    #[test]
    fn interlaced_partitions_are_contiguous_stripes() {
        for (eventual, num_pixels) in [(4_usize, 100_usize), (8, 101), (6, 37), (13, 64)] {
            let img = indexed_image(num_pixels);
            let interlaced = img.interlaced(eventual, Vec::new());
            assert_eq!(interlaced.num_pixels(), num_pixels);

            let mut original = Image::new(num_pixels as u32, 1, PixelLayout::RGBA_U8_DEPTH);
            img.decompress_into(&mut original, 0).unwrap();

            let mut pieces = Vec::new();
            let mut offsets = Vec::new();
            interlaced.split_into(0, eventual, eventual, &mut pieces, &mut offsets);

            for (partition, piece) in pieces.iter().enumerate() {
                let stripe = interlace_offset(partition, eventual, num_pixels);
                let mut flat = Image::new(piece.num_pixels() as u32, 1, piece.layout());
                piece.decompress_into(&mut flat, 0).unwrap();

                let want = &original.color_plane()[stripe * 4..(stripe + piece.num_pixels()) * 4];
                assert_eq!(flat.color_plane(), want);
            }
        }
    }
}
