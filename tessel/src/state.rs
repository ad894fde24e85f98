//! Frame-wide configuration and tile metadata.
//!
//! The compositing strategies are parameterized by two typed structures
//! instead of a string-keyed state dictionary: [`ComposeOptions`] carries the
//! knobs that rarely change between frames, [`FrameState`] describes the
//! tiles and contributions of the frame being composited. Derived quantities
//! (contribution counts, the total image count) are computed from the masks
//! rather than stored alongside them, so they cannot drift apart.

use tessel_sparse::{CompositeMode, PixelLayout};

/// Tuning knobs of the compositing strategies.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Preferred per-round radix of radix-k. Factorization targets this
    /// value; 8 is a good default on most interconnects.
    pub magic_k: usize,
    /// Interlace the input image before a multi-round radix-k composite so
    /// that every final partition is a contiguous stripe of the input and
    /// active pixels spread evenly over the rounds.
    pub interlace_images: bool,
    /// Whether image order is semantically meaningful (alpha blending). When
    /// set, process assignment preserves the global composite order.
    pub ordered_composite: bool,
    /// How two overlapping pixels combine.
    pub composite_mode: CompositeMode,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            magic_k: 8,
            interlace_images: true,
            ordered_composite: false,
            composite_mode: CompositeMode::ZBuffer,
        }
    }
}

/// Placement of a tile in the global display: its offset and size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Left edge in global display coordinates.
    pub x: u32,
    /// Bottom edge in global display coordinates.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Viewport {
    /// Pixels covered by the viewport.
    pub fn num_pixels(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

/// One output tile: where it is displayed and by whom.
#[derive(Debug, Clone, Copy)]
pub struct Tile {
    /// World rank of the process that displays this tile.
    pub display_node: usize,
    /// The tile's viewport.
    pub viewport: Viewport,
}

/// Everything the reduce strategy needs to know about the frame: the tiles,
/// which process rendered into which tile, and the global composite order.
#[derive(Debug, Clone)]
pub struct FrameState {
    /// The output tiles.
    pub tiles: Vec<Tile>,
    /// Number of processes in the world.
    pub num_processes: usize,
    /// Plane layout every image of the frame uses.
    pub layout: PixelLayout,
    /// Process-major contribution mask: `contrib_masks[p * num_tiles + t]`
    /// is true when process `p` rendered something into tile `t`.
    pub contrib_masks: Vec<bool>,
    /// Ranks ordered front to back. `None` means rank order, which is all an
    /// unordered composite needs.
    pub composite_order: Option<Vec<usize>>,
}

impl FrameState {
    /// Number of output tiles.
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Whether process `rank` rendered something into `tile`.
    pub fn contributes(&self, rank: usize, tile: usize) -> bool {
        self.contrib_masks[rank * self.num_tiles() + tile]
    }

    /// Number of processes contributing to each tile.
    pub fn contrib_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_tiles()];
        for rank in 0..self.num_processes {
            for (tile, count) in counts.iter_mut().enumerate() {
                *count += usize::from(self.contributes(rank, tile));
            }
        }
        counts
    }

    /// Total number of contributions across all tiles.
    pub fn total_image_count(&self) -> usize {
        self.contrib_masks.iter().filter(|&&c| c).count()
    }

    /// The ranks front to back: the declared composite order, or rank order.
    pub(crate) fn ranks_in_composite_order(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_processes).map(move |i| match &self.composite_order {
            Some(order) => order[i],
            None => i,
        })
    }

    /// The tile `rank` displays, if any.
    pub fn displayed_tile(&self, rank: usize) -> Option<usize> {
        self.tiles.iter().position(|t| t.display_node == rank)
    }
}
