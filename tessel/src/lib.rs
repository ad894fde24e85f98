/*!
Sort-last parallel image compositing.

In sort-last rendering every process of a cluster renders its share of the
scene into a full-size image, and the images are combined ("composited")
pixel by pixel into the final picture. This crate implements the compositing
side of that pipeline over nothing but tagged point-to-point messages (the
[`comm::Comm`] trait):

- [`radixk::compose`] — the radix-k single-image algorithm: the group
  repeatedly splits into subgroups of size k, trades image pieces, and folds
  them with a pair-composite tree, leaving the finished image partitioned
  across the group.
- [`collect::single_image_collect`] — gathers those partitions into a flat
  [`sparse::Image`] on a display process.
- [`reduce::compose`] — the multi-tile strategy: assigns processes to tiles
  proportionally to rendering load, routes contributions, composites each
  tile with radix-k, and collects every tile to its display process.

Images travel in the run-length encoded format of the [`tessel-sparse`]
crate, re-exported here as [`sparse`].

Everything is synchronous within a process: the only blocking points are the
waits on message requests, and a failure anywhere is fatal to the collective
([`Error`]).

[`tessel-sparse`]: tessel_sparse
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod arena;
pub mod collect;
pub mod comm;
mod error;
mod factor;
pub mod radixk;
pub mod reduce;
mod state;

pub use arena::{BufferArena, ScratchKey};
pub use error::{Error, Result};
pub use state::{ComposeOptions, FrameState, Tile, Viewport};

pub use tessel_sparse as sparse;
