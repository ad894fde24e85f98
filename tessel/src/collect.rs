//! Gathering composited partitions into a flat image on a display process.

use log::debug;
use tessel_sparse::{ColorFormat, DepthFormat, FormatError, Image, SparseImage};

use crate::comm::{Comm, SWAP_DEPTH_DATA, SWAP_IMAGE_DATA};
use crate::error::{Error, Result};

const PIECE_HEADER_LEN: usize = 16;

fn encode_piece_header(offset: usize, size: usize) -> [u8; PIECE_HEADER_LEN] {
    let mut header = [0; PIECE_HEADER_LEN];
    header[..8].copy_from_slice(&(offset as u64).to_le_bytes());
    header[8..].copy_from_slice(&(size as u64).to_le_bytes());
    header
}

fn decode_piece_header(payload: &[u8]) -> Result<(usize, usize)> {
    if payload.len() != PIECE_HEADER_LEN {
        return Err(Error::PlaneSizeMismatch {
            expected: PIECE_HEADER_LEN,
            received: payload.len(),
        });
    }
    let offset = u64::from_le_bytes(payload[..8].try_into().unwrap());
    let size = u64::from_le_bytes(payload[8..].try_into().unwrap());
    Ok((offset as usize, size as usize))
}

/// Concatenates the composited partitions of the world into `result` on the
/// process of rank `image_dest`.
///
/// Every process of the world calls this for every tile, passing its own
/// partition for the tile it helped composite and `None` otherwise. Each
/// partition announces its pixel placement explicitly, so it does not matter
/// which rank ended up with which part of the image. Nothing is composited
/// here; the partitions are final and are only copied into place.
///
/// Only the destination reads or writes `result`, which must already have
/// the tile's dimensions there.
pub fn single_image_collect<C: Comm + ?Sized>(
    comm: &mut C,
    piece: Option<&SparseImage>,
    image_dest: usize,
    piece_offset: usize,
    result: &mut Image,
) -> Result<()> {
    if comm.rank() == image_dest {
        collect_at_destination(comm, piece, piece_offset, result)
    } else {
        send_to_destination(comm, piece, piece_offset, image_dest)
    }
}

fn collect_at_destination<C: Comm + ?Sized>(
    comm: &mut C,
    piece: Option<&SparseImage>,
    piece_offset: usize,
    result: &mut Image,
) -> Result<()> {
    debug!("collecting image data");
    let rank = comm.rank();
    let num_ranks = comm.num_ranks();

    if let Some(piece) = piece {
        piece.decompress_into(result, piece_offset)?;
    }

    // Every peer announces where its partition lands before any plane data
    // flows.
    let mut requests = Vec::with_capacity(num_ranks.saturating_sub(1));
    for sender in (0..num_ranks).filter(|&r| r != rank) {
        requests.push((sender, comm.irecv(sender, SWAP_IMAGE_DATA)?));
    }
    let mut pieces = vec![(0, 0); num_ranks];
    for (sender, request) in requests {
        let payload = comm.wait(request)?;
        pieces[sender] = decode_piece_header(&payload)?;
    }

    let layout = result.layout();
    for (sender, &(offset, size)) in pieces.iter().enumerate() {
        if sender == rank || size == 0 {
            continue;
        }
        if offset + size > result.num_pixels() {
            return Err(Error::Format(FormatError::DimensionMismatch));
        }

        if layout.color != ColorFormat::None {
            let bytes = layout.color_bytes();
            let payload = comm.recv(sender, SWAP_IMAGE_DATA)?;
            if payload.len() != size * bytes {
                return Err(Error::PlaneSizeMismatch {
                    expected: size * bytes,
                    received: payload.len(),
                });
            }
            result.color_plane_mut()[offset * bytes..(offset + size) * bytes]
                .copy_from_slice(&payload);
        }

        if layout.depth == DepthFormat::F32 {
            let bytes = layout.depth_bytes();
            let payload = comm.recv(sender, SWAP_DEPTH_DATA)?;
            if payload.len() != size * bytes {
                return Err(Error::PlaneSizeMismatch {
                    expected: size * bytes,
                    received: payload.len(),
                });
            }
            result.depth_plane_bytes_mut()[offset * bytes..(offset + size) * bytes]
                .copy_from_slice(&payload);
        }
    }

    Ok(())
}

fn send_to_destination<C: Comm + ?Sized>(
    comm: &mut C,
    piece: Option<&SparseImage>,
    piece_offset: usize,
    image_dest: usize,
) -> Result<()> {
    let size = piece.map_or(0, SparseImage::num_pixels);
    comm.send(
        image_dest,
        SWAP_IMAGE_DATA,
        &encode_piece_header(piece_offset, size),
    )?;

    let Some(piece) = piece else { return Ok(()) };
    if size == 0 {
        return Ok(());
    }

    // The wire format is flat plane slices, so the compressed partition is
    // expanded locally first.
    let layout = piece.layout();
    let mut flat = Image::new(size as u32, 1, layout);
    piece.decompress_into(&mut flat, 0)?;

    if layout.color != ColorFormat::None {
        comm.send(image_dest, SWAP_IMAGE_DATA, flat.color_plane())?;
    }
    if layout.depth == DepthFormat::F32 {
        comm.send(image_dest, SWAP_DEPTH_DATA, flat.depth_plane_bytes())?;
    }

    Ok(())
}
