//! The radix-k single-image compositing strategy.
//!
//! The group of G processes runs R rounds, where the round radices multiply
//! to G. In round r the group falls apart into subgroups of k_r processes;
//! every member splits its current partition into k_r pieces, keeps the piece
//! at its own partition index, sends the other k_r − 1 out, and folds the
//! arriving pieces into the kept one with a pair-composite tree. The
//! partition every process holds thus shrinks by a factor of k_r per round
//! while the image fragments across the group; after the last round each
//! process owns one of G partitions of the final image. Gathering them to a
//! single process is a separate step ([`crate::collect`]).

mod partners;
mod tree;

use tessel_sparse::{
    CompositeMode, ColorFormat, DepthFormat, FormatError, PixelLayout, SparseImage,
    composite_into, interlace_offset, split_partition_num_pixels,
};

use crate::arena::{BufferArena, ScratchKey};
use crate::comm::{Comm, RADIXK_SWAP_IMAGE_TAG_START, RecvRequest, Tag};
use crate::error::{Error, Result};
use crate::factor::{factorize, pivot_order};
use crate::state::ComposeOptions;
use partners::{final_partition_index, partition_indices, partner_group_ranks};
use tree::CompositeTree;

/// Checks that the image layout carries the planes the composite mode needs.
pub(crate) fn check_mode(layout: PixelLayout, mode: CompositeMode) -> Result<()> {
    let missing = match mode {
        CompositeMode::ZBuffer => layout.depth == DepthFormat::None,
        CompositeMode::AlphaBlend => layout.color == ColorFormat::None,
    };
    if missing {
        return Err(Error::Format(FormatError::MissingPlane));
    }
    Ok(())
}

/// Composites the copies of one image held by `compose_group` and leaves the
/// result partitioned across the group.
///
/// Every member of the group must call this with the same group, in the same
/// order; the group must be listed front to back when the composite mode is
/// order sensitive. Returns the partition this process ends up owning and
/// its pixel offset within the finished image. `image_dest` names the rank
/// the frame driver will eventually gather to; the exchange itself ignores
/// it, since gathering is a separate collect step.
pub fn compose<C: Comm + ?Sized>(
    comm: &mut C,
    arena: &mut BufferArena,
    options: &ComposeOptions,
    compose_group: &[usize],
    image_dest: usize,
    input: SparseImage,
) -> Result<(SparseImage, usize)> {
    let _ = image_dest;

    let group_rank = compose_group
        .iter()
        .position(|&rank| rank == comm.rank())
        .ok_or(Error::NotInGroup)?;
    let group_size = compose_group.len();

    if group_size == 1 {
        // Alone in the group: the input already is the finished partition.
        return Ok((input, 0));
    }

    let layout = input.layout();
    check_mode(layout, options.composite_mode)?;

    let k_array = factorize(group_size, options.magic_k)?;
    if k_array.is_empty() {
        return Err(Error::NoRounds);
    }
    let indices = partition_indices(&k_array, group_rank);

    let input_pixels = input.num_pixels();
    let use_interlace = k_array.len() > 1 && options.interlace_images;
    let mut working = if use_interlace {
        let staging = arena.take(ScratchKey::Interlace);
        let interlaced = input.interlaced(group_size, staging);
        arena.restore(ScratchKey::Interlace, input.into_bytes());
        interlaced
    } else {
        input
    };

    let mut my_offset = 0;
    let mut remaining_partitions = group_size;

    let mut pieces: Vec<SparseImage> = Vec::new();
    let mut piece_offsets: Vec<usize> = Vec::new();
    let mut pending: Vec<Option<RecvRequest>> = Vec::new();
    let mut sends = Vec::new();

    // Pool of merge output buffers; received piece buffers join it as they
    // are consumed. A merge result is at most one piece large.
    let mut out_bufs = vec![arena.take(ScratchKey::TreeSpare)];
    out_bufs[0].reserve(SparseImage::buffer_size(
        split_partition_num_pixels(input_pixels, k_array[0], group_size),
        layout,
    ));

    for (round, (&k, &partition_index)) in k_array.iter().zip(&indices).enumerate() {
        let tag = RADIXK_SWAP_IMAGE_TAG_START + round as Tag;
        let partner_ranks: Vec<usize> = partner_group_ranks(&k_array, round, group_rank)
            .map(|g| compose_group[g])
            .collect();

        // Receives go up before any piece is in flight so that every
        // incoming message finds a matching post.
        pending.clear();
        for (i, &rank) in partner_ranks.iter().enumerate() {
            pending.push(if i == partition_index {
                None
            } else {
                Some(comm.irecv(rank, tag)?)
            });
        }

        working.split_into(
            my_offset,
            k,
            remaining_partitions,
            &mut pieces,
            &mut piece_offsets,
        );

        // Fan the sends out from our own slot so early arrivals spread
        // evenly over the subgroup; correctness does not depend on it.
        for i in pivot_order(0, k, partition_index) {
            if i != partition_index {
                sends.push(comm.isend(partner_ranks[i], tag, pieces[i].as_bytes())?);
            }
        }

        // The kept piece needs no message; it enters the tree right away.
        let mine = core::mem::replace(
            &mut pieces[partition_index],
            SparseImage::blank(0, 0, layout),
        );
        let my_dims = (mine.width(), mine.height());

        let mut slots: Vec<Option<SparseImage>> = (0..k).map(|_| None).collect();
        slots[partition_index] = Some(mine);
        let mut tree = CompositeTree::new(k);
        let mode = options.composite_mode;
        let mut merge = |front: SparseImage, back: SparseImage| -> SparseImage {
            let buf = out_bufs.pop().unwrap_or_default();
            let merged = composite_into(&front, &back, mode, buf)
                .expect("pieces of one round share dimensions and layout");
            out_bufs.push(front.into_bytes());
            out_bufs.push(back.into_bytes());
            merged
        };

        let mut done = tree.arrived(partition_index, &mut slots, &mut merge);
        while !done {
            let (from, payload) = comm.wait_any(&mut pending)?;
            let piece = SparseImage::from_bytes(payload)?;
            if (piece.width(), piece.height()) != my_dims {
                return Err(Error::PieceSizeMismatch {
                    round,
                    expected: my_dims,
                    received: (piece.width(), piece.height()),
                });
            }
            if piece.layout() != layout {
                return Err(Error::Format(FormatError::LayoutMismatch));
            }
            slots[from] = Some(piece);
            done = tree.arrived(from, &mut slots, &mut merge);
        }
        debug_assert_eq!(tree.merges_done(), k - 1);

        // The send buffers must stay untouched until the transport is done
        // with them; only then may the next round reuse them.
        comm.wait_all_sends(&mut sends)?;

        let merged = slots[0].take().expect("tree reduces into slot 0");
        my_offset = piece_offsets[partition_index];
        remaining_partitions /= k;
        out_bufs.push(working.into_bytes());
        working = merged;
    }

    arena.restore(ScratchKey::TreeSpare, out_bufs.pop().unwrap_or_default());

    let piece_offset = if use_interlace {
        interlace_offset(
            final_partition_index(&k_array, &indices),
            group_size,
            input_pixels,
        )
    } else {
        my_offset
    };

    Ok((working, piece_offset))
}
