//! The reduce strategy: delegate tiles to process groups, composite each
//! tile with a single-image strategy, and collect the results on the
//! display processes.
//!
//! The strategy runs in three phases. Delegation assigns processes to tiles
//! proportionally to how many images each tile has to fold and routes every
//! rendered contribution to a member of the tile's group. Render transfer
//! moves the contributions; each group member folds what it receives into
//! one image of its tile. The group then runs the radix-k single-image
//! composite and every process takes part in collecting each tile to its
//! display process.

mod delegate;

use log::debug;
use tessel_sparse::{FormatError, Image, SparseImage, composite_into};

use crate::arena::{BufferArena, ScratchKey};
use crate::collect::single_image_collect;
use crate::comm::{Comm, RENDER_TRANSFER_DATA};
use crate::error::{Error, Result};
use crate::radixk;
use crate::state::{ComposeOptions, FrameState};
use delegate::{Delegation, delegate};

/// Composites every tile of the frame and returns this process's result
/// image: the finished tile on display processes, an empty image elsewhere.
///
/// `contributions[t]` is this process's rendered image for tile `t`, with
/// the tile's viewport dimensions; it must be present exactly for the tiles
/// the frame state's contribution mask names. Every process of the world
/// must call this once per frame.
pub fn compose<C: Comm + ?Sized>(
    comm: &mut C,
    arena: &mut BufferArena,
    options: &ComposeOptions,
    frame: &FrameState,
    contributions: Vec<Option<SparseImage>>,
) -> Result<Image> {
    let rank = comm.rank();
    debug_assert_eq!(contributions.len(), frame.num_tiles());
    radixk::check_mode(frame.layout, options.composite_mode)?;

    debug!(
        "reduce: {} tiles over {} processes",
        frame.num_tiles(),
        frame.num_processes
    );
    let delegation = delegate(frame, rank, options.ordered_composite)?;

    let rendered = render_transfer(comm, arena, frame, &delegation, contributions, options)?;

    let mut piece_offset = 0;
    let composited = match (delegation.compose_tile, rendered) {
        (Some(_), Some(image)) => {
            let (image, offset) = radixk::compose(
                comm,
                arena,
                options,
                &delegation.compose_group,
                delegation.group_image_dest,
                image,
            )?;
            piece_offset = offset;
            Some(image)
        }
        _ => None,
    };

    // Collect runs for every tile on every process, not just the tile (if
    // any) this process composited: the display processes gather from the
    // whole world.
    let mut result = Image::new(0, 0, frame.layout);
    for (tile, t) in frame.tiles.iter().enumerate() {
        let (piece, offset) = if delegation.compose_tile == Some(tile) {
            (composited.as_ref(), piece_offset)
        } else {
            (None, 0)
        };
        if t.display_node == rank {
            result.set_dimensions(t.viewport.width, t.viewport.height);
        }
        single_image_collect(comm, piece, t.display_node, offset, &mut result)?;
    }

    // A display process whose tile had no contributions at all must still
    // hand back an empty image of the right size.
    if let Some(displayed) = frame.displayed_tile(rank) {
        if delegation.compose_tile != Some(displayed) {
            debug!("clearing pixels");
            let viewport = frame.tiles[displayed].viewport;
            result.set_dimensions(viewport.width, viewport.height);
        }
    }

    Ok(result)
}

/// Moves every rendered contribution to its destination and folds the pieces
/// arriving here into this process's share of its tile.
fn render_transfer<C: Comm + ?Sized>(
    comm: &mut C,
    arena: &mut BufferArena,
    frame: &FrameState,
    delegation: &Delegation,
    mut contributions: Vec<Option<SparseImage>>,
    options: &ComposeOptions,
) -> Result<Option<SparseImage>> {
    let rank = comm.rank();

    // Receives first, sends second, so no message arrives unsolicited.
    let mut posts = Vec::with_capacity(delegation.incoming.len());
    for &sender in &delegation.incoming {
        posts.push(if sender == rank {
            None
        } else {
            Some(comm.irecv(sender, RENDER_TRANSFER_DATA)?)
        });
    }

    let mut sends = Vec::new();
    let mut stand_ins = Vec::new();
    for (tile, dest) in delegation.tile_image_dest.iter().enumerate() {
        let Some(dest) = *dest else { continue };
        if dest == rank {
            continue; // Kept local; folded below without a message.
        }
        let viewport = frame.tiles[tile].viewport;
        let image = match contributions[tile].as_ref() {
            Some(image) => image,
            None => {
                // Declared contributor with nothing rendered: a blank image
                // keeps the receiver's bookkeeping simple.
                stand_ins.push(SparseImage::blank(
                    viewport.width,
                    viewport.height,
                    frame.layout,
                ));
                stand_ins.last().unwrap()
            }
        };
        sends.push(comm.isend(dest, RENDER_TRANSFER_DATA, image.as_bytes())?);
    }

    let Some(compose_tile) = delegation.compose_tile else {
        comm.wait_all_sends(&mut sends)?;
        return Ok(None);
    };
    let viewport = frame.tiles[compose_tile].viewport;

    // Fold front to back; `incoming` is already in composite order.
    let mut out_bufs = vec![arena.take(ScratchKey::TransferFold)];
    let mut rendered: Option<SparseImage> = None;
    for (i, &sender) in delegation.incoming.iter().enumerate() {
        let image = if sender == rank {
            contributions[compose_tile].take().unwrap_or_else(|| {
                SparseImage::blank(viewport.width, viewport.height, frame.layout)
            })
        } else {
            let request = posts[i].take().expect("posted receive for every peer");
            let payload = comm.wait(request)?;
            SparseImage::from_bytes(payload)?
        };
        if (image.width(), image.height()) != (viewport.width, viewport.height) {
            return Err(Error::Format(FormatError::DimensionMismatch));
        }

        rendered = Some(match rendered {
            None => image,
            Some(front) => {
                let buf = out_bufs.pop().unwrap_or_default();
                let merged = composite_into(&front, &image, options.composite_mode, buf)?;
                out_bufs.push(front.into_bytes());
                out_bufs.push(image.into_bytes());
                merged
            }
        });
    }

    comm.wait_all_sends(&mut sends)?;
    arena.restore(ScratchKey::TransferFold, out_bufs.pop().unwrap_or_default());

    // A seat that received nothing still composites: with a blank image.
    Ok(Some(rendered.unwrap_or_else(|| {
        SparseImage::blank(viewport.width, viewport.height, frame.layout)
    })))
}
