//! Assigning processes to tiles and routing contributions to them.
//!
//! Every process runs the same deterministic computation over the shared
//! frame state, so each one learns not only where to send its own rendered
//! contributions but also which peers will be sending to it, without any
//! message exchange.

use crate::error::{Error, Result};
use crate::state::FrameState;

/// The routing decisions of one process for one frame.
pub(crate) struct Delegation {
    /// The tile this process helps composite, if any.
    pub(crate) compose_tile: Option<usize>,
    /// For every tile: the rank this process sends its rendered contribution
    /// to. `None` for tiles it did not render into.
    pub(crate) tile_image_dest: Vec<Option<usize>>,
    /// The group compositing `compose_tile`, front to back.
    pub(crate) compose_group: Vec<usize>,
    /// Position of the tile's display process within `compose_group`.
    pub(crate) group_image_dest: usize,
    /// Ranks whose contributions arrive here during render transfer, front
    /// to back. Contains this process itself when it keeps its own piece.
    pub(crate) incoming: Vec<usize>,
}

impl Delegation {
    fn idle(num_tiles: usize) -> Self {
        Self {
            compose_tile: None,
            tile_image_dest: vec![None; num_tiles],
            compose_group: Vec::new(),
            group_image_dest: 0,
            incoming: Vec::new(),
        }
    }
}

/// Computes the frame's process-to-tile assignment and this process's
/// routing.
pub(crate) fn delegate(frame: &FrameState, rank: usize, ordered: bool) -> Result<Delegation> {
    let num_tiles = frame.num_tiles();
    let contrib_counts = frame.contrib_counts();
    let total_images: usize = contrib_counts.iter().sum();

    if total_images == 0 {
        // No process rendered anything.
        return Ok(Delegation::idle(num_tiles));
    }

    let num_proc_for_tile =
        allocate_processes(&contrib_counts, frame.num_processes, total_images);
    let (node_assignment, mut groups) = assign_processes(frame, &num_proc_for_tile);

    let compose_tile = node_assignment[rank];
    let mut delegation = Delegation::idle(num_tiles);
    delegation.compose_tile = compose_tile;

    for tile in 0..num_tiles {
        let my_tile = compose_tile == Some(tile);
        if !my_tile && !frame.contributes(rank, tile) {
            continue;
        }

        let pairs = if ordered {
            ordered_destinations(
                frame,
                tile,
                &node_assignment,
                &mut groups[tile],
                contrib_counts[tile],
            )?
        } else {
            unordered_destinations(frame, tile, &node_assignment, &groups[tile])
        };

        if let Some(&(_, dest)) = pairs.iter().find(|&&(sender, _)| sender == rank) {
            delegation.tile_image_dest[tile] = Some(dest);
        }

        if my_tile {
            delegation.incoming = pairs
                .iter()
                .filter(|&&(_, dest)| dest == rank)
                .map(|&(sender, _)| sender)
                .collect();
            delegation.group_image_dest = groups[tile]
                .iter()
                .position(|&p| p == frame.tiles[tile].display_node)
                .ok_or(Error::DisplayNotInGroup { tile })?;
            delegation.compose_group = groups[tile].clone();
        }
    }

    Ok(delegation)
}

/// Decides how many processes compose each tile, proportionally to how many
/// images the tile has to fold.
fn allocate_processes(
    contrib_counts: &[usize],
    num_processes: usize,
    total_images: usize,
) -> Vec<usize> {
    let mut num_proc: Vec<usize> = contrib_counts
        .iter()
        .map(|&contrib| {
            if contrib == 0 {
                0
            } else {
                // At least one process per non-empty tile, never more
                // processes than images.
                (contrib * num_processes / total_images).clamp(1, contrib)
            }
        })
        .collect();
    let mut allocated: usize = num_proc.iter().sum();

    // Too few allocated: feed the tile with the highest image-to-process
    // ratio that still has headroom.
    while allocated < num_processes {
        let candidate = (0..contrib_counts.len())
            .filter(|&t| num_proc[t] < contrib_counts[t])
            .max_by(|&a, &b| {
                (contrib_counts[a] * num_proc[b]).cmp(&(contrib_counts[b] * num_proc[a]))
            });
        match candidate {
            Some(tile) => {
                num_proc[tile] += 1;
                allocated += 1;
            }
            None => break,
        }
    }

    // Too many: starve the tile with the lowest ratio that can spare one.
    while allocated > num_processes {
        let candidate = (0..contrib_counts.len())
            .filter(|&t| num_proc[t] > 1)
            .min_by(|&a, &b| {
                (contrib_counts[a] * num_proc[b]).cmp(&(contrib_counts[b] * num_proc[a]))
            });
        match candidate {
            Some(tile) => {
                num_proc[tile] -= 1;
                allocated -= 1;
            }
            None => break,
        }
    }

    num_proc
}

/// Fills the tile groups: display nodes anchor their own tiles, contributors
/// join a tile they rendered while there is room, and whoever is left fills
/// the remaining seats in tile order.
fn assign_processes(
    frame: &FrameState,
    num_proc_for_tile: &[usize],
) -> (Vec<Option<usize>>, Vec<Vec<usize>>) {
    let num_tiles = frame.num_tiles();
    let mut assignment: Vec<Option<usize>> = vec![None; frame.num_processes];
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); num_tiles];

    for (tile, t) in frame.tiles.iter().enumerate() {
        if num_proc_for_tile[tile] > 0 {
            assignment[t.display_node] = Some(tile);
            groups[tile].push(t.display_node);
        }
    }

    for node in 0..frame.num_processes {
        if assignment[node].is_some() {
            continue;
        }
        for tile in 0..num_tiles {
            if frame.contributes(node, tile) && groups[tile].len() < num_proc_for_tile[tile] {
                assignment[node] = Some(tile);
                groups[tile].push(node);
                break;
            }
        }
    }

    let mut node = 0;
    for tile in 0..num_tiles {
        while groups[tile].len() < num_proc_for_tile[tile] {
            while node < frame.num_processes && assignment[node].is_some() {
                node += 1;
            }
            if node >= frame.num_processes {
                break;
            }
            assignment[node] = Some(tile);
            groups[tile].push(node);
        }
    }

    (assignment, groups)
}

/// Pairs every contributor of `tile` with a receiver, minimizing traffic:
/// in-group contributors keep their own image, the rest are walked with two
/// cursors, preferring receivers that do not already keep an image of their
/// own.
fn unordered_destinations(
    frame: &FrameState,
    tile: usize,
    node_assignment: &[Option<usize>],
    proc_group: &[usize],
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut rnode: isize = -1;
    let mut first_loop = true;

    for snode in 0..frame.num_processes {
        if !frame.contributes(snode, tile) {
            continue;
        }
        if node_assignment[snode] == Some(tile) {
            // In the group and holding data: keeps its own image.
            pairs.push((snode, snode));
            continue;
        }

        let dest = loop {
            rnode += 1;
            if rnode as usize >= proc_group.len() {
                rnode = 0;
                first_loop = false;
            }
            let dest = proc_group[rnode as usize];
            // On the first pass, skip receivers that keep their own image;
            // afterwards, hand out seats round robin.
            if !(first_loop
                && frame.contributes(dest, tile)
                && node_assignment[dest] == Some(tile))
            {
                break dest;
            }
        };
        pairs.push((snode, dest));
    }

    pairs
}

/// Pairs contributors with receivers so that every receiver gets a chunk of
/// images that is contiguous in the global composite order. Shuffles
/// `proc_group` so that the owner of a chunk receives it when possible.
fn ordered_destinations(
    frame: &FrameState,
    tile: usize,
    node_assignment: &[Option<usize>],
    proc_group: &mut [usize],
    expected_contributors: usize,
) -> Result<Vec<(usize, usize)>> {
    let contributors: Vec<usize> = frame
        .ranks_in_composite_order()
        .filter(|&r| frame.contributes(r, tile))
        .collect();
    if contributors.len() != expected_contributors {
        return Err(Error::ContributorMiscount {
            tile,
            counted: contributors.len(),
            expected: expected_contributors,
        });
    }

    let group_size = proc_group.len();
    for (i, &snode) in contributors.iter().enumerate() {
        if node_assignment[snode] != Some(tile) {
            continue;
        }
        // snode is in the group; move it to the seat of the chunk it owns.
        let piece = i * group_size / contributors.len();
        let seat = proc_group.iter().rposition(|&p| p == snode);
        debug_assert!(seat.is_some(), "assigned process missing from its group");
        if let Some(seat) = seat {
            proc_group.swap(seat, piece);
        }
    }

    Ok(contributors
        .iter()
        .enumerate()
        .map(|(i, &snode)| (snode, proc_group[i * group_size / contributors.len()]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Tile, Viewport};
    use tessel_sparse::PixelLayout;

    fn viewport() -> Viewport {
        Viewport {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        }
    }

    /// Two tiles, four processes: ranks 0..2 render into tile 0, rank 3 into
    /// tile 1; tiles are displayed by ranks 0 and 1.
    fn two_tile_frame() -> FrameState {
        FrameState {
            tiles: vec![
                Tile {
                    display_node: 0,
                    viewport: viewport(),
                },
                Tile {
                    display_node: 1,
                    viewport: viewport(),
                },
            ],
            num_processes: 4,
            layout: PixelLayout::RGBA_U8_DEPTH,
            contrib_masks: vec![
                true, false, // rank 0
                true, false, // rank 1
                true, false, // rank 2
                false, true, // rank 3
            ],
            composite_order: None,
        }
    }

    #[test]
    fn allocation_is_proportional_to_contributions() {
        assert_eq!(allocate_processes(&[3, 1], 4, 4), vec![3, 1]);
        assert_eq!(allocate_processes(&[8], 4, 8), vec![4]);
        // A tile with one image never gets more than one process.
        assert_eq!(allocate_processes(&[1, 7], 8, 8), vec![1, 7]);
        // Empty tiles get nothing.
        assert_eq!(allocate_processes(&[0, 4], 2, 4), vec![0, 2]);
    }

    #[test]
    fn display_nodes_anchor_their_tiles() {
        let frame = two_tile_frame();
        let (assignment, groups) = assign_processes(&frame, &[3, 1]);
        assert_eq!(groups[0], vec![0, 2, 3]);
        assert_eq!(groups[1], vec![1]);
        assert_eq!(
            assignment,
            vec![Some(0), Some(1), Some(0), Some(0)]
        );
    }

    #[test]
    fn two_tile_scenario_routes_every_contribution() {
        let frame = two_tile_frame();

        // Rank 1 contributes to tile 0 but composes tile 1: its image goes
        // to rank 3, the group seat with no data of its own.
        let d1 = delegate(&frame, 1, false).unwrap();
        assert_eq!(d1.compose_tile, Some(1));
        assert_eq!(d1.compose_group, vec![1]);
        assert_eq!(d1.tile_image_dest[0], Some(3));
        // Rank 3 sends its tile-1 rendering to the tile-1 group.
        let d3 = delegate(&frame, 3, false).unwrap();
        assert_eq!(d3.compose_tile, Some(0));
        assert_eq!(d3.tile_image_dest[1], Some(1));
        assert_eq!(d3.incoming, vec![1]);
        // Ranks 0 and 2 keep their own contributions.
        let d0 = delegate(&frame, 0, false).unwrap();
        assert_eq!(d0.tile_image_dest[0], Some(0));
        assert_eq!(d0.incoming, vec![0]);
        assert_eq!(d0.group_image_dest, 0);
        let d2 = delegate(&frame, 2, false).unwrap();
        assert_eq!(d2.tile_image_dest[0], Some(2));
        assert_eq!(d2.incoming, vec![2]);
        // Rank 1's group: itself, receiving rank 3's contribution.
        assert_eq!(d1.incoming, vec![3]);
    }

    #[test]
    fn idle_frame_assigns_nobody() {
        let mut frame = two_tile_frame();
        frame.contrib_masks = vec![false; 8];
        let delegation = delegate(&frame, 2, false).unwrap();
        assert_eq!(delegation.compose_tile, None);
        assert!(delegation.incoming.is_empty());
    }

    #[test]
    fn ordered_chunks_follow_composite_order() {
        // One tile, four processes, all contributing, composite order
        // reversed: chunks must follow that order.
        let frame = FrameState {
            tiles: vec![Tile {
                display_node: 0,
                viewport: viewport(),
            }],
            num_processes: 4,
            layout: PixelLayout::RGBA_U8_DEPTH,
            contrib_masks: vec![true; 4],
            composite_order: Some(vec![3, 2, 1, 0]),
        };

        for rank in 0..4 {
            let d = delegate(&frame, rank, true).unwrap();
            assert_eq!(d.compose_tile, Some(0));
            // Every contributor keeps its own image: the chunk owners are
            // exactly the contributors in order.
            assert_eq!(d.tile_image_dest[0], Some(rank));
            assert_eq!(d.incoming, vec![rank]);
            // The group is shuffled into composite order.
            assert_eq!(d.compose_group, vec![3, 2, 1, 0]);
            assert_eq!(d.group_image_dest, 3);
        }
    }
}
