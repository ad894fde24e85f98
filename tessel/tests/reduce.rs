//! End-to-end reduce-strategy scenarios over in-process worlds.

mod common;

use common::{blend_image, depth_image, reference_composite, run_world};
use tessel::sparse::{CompositeMode, Image, PixelLayout};
use tessel::comm::Comm;
use tessel::{BufferArena, ComposeOptions, FrameState, Tile, Viewport, reduce};

const TILE_W: u32 = 8;
const TILE_H: u32 = 4;

fn viewport(x: u32) -> Viewport {
    Viewport {
        x,
        y: 0,
        width: TILE_W,
        height: TILE_H,
    }
}

/// Two tiles displayed by ranks 0 and 1; ranks 0..2 render into tile 0 and
/// rank 3 into tile 1.
fn two_tile_frame() -> FrameState {
    FrameState {
        tiles: vec![
            Tile {
                display_node: 0,
                viewport: viewport(0),
            },
            Tile {
                display_node: 1,
                viewport: viewport(TILE_W),
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
fn two_tiles_land_on_their_display_processes() {
    let options = ComposeOptions::default();
    let results = run_world(4, move |comm| {
        let frame = two_tile_frame();
        let mut contributions = vec![None, None];
        if comm.rank() < 3 {
            contributions[0] = Some(depth_image(comm.rank(), TILE_W, TILE_H));
        } else {
            contributions[1] = Some(depth_image(comm.rank(), TILE_W, TILE_H));
        }

        let mut arena = BufferArena::new();
        reduce::compose(comm, &mut arena, &options, &frame, contributions).unwrap()
    });

    // Tile 0 on rank 0: the fold of the three contributions. The composite
    // is depth tested with collision-free depths, so any fold order gives
    // the same bytes.
    let tile0_inputs: Vec<_> = (0..3).map(|r| depth_image(r, TILE_W, TILE_H)).collect();
    assert_eq!(results[0], reference_composite(&tile0_inputs, CompositeMode::ZBuffer));

    // Tile 1 on rank 1: rank 3's contribution, expanded.
    let mut tile1 = Image::new(TILE_W, TILE_H, PixelLayout::RGBA_U8_DEPTH);
    depth_image(3, TILE_W, TILE_H)
        .decompress_into(&mut tile1, 0)
        .unwrap();
    assert_eq!(results[1], tile1);

    // Non-display processes return an empty image.
    assert_eq!(results[2].num_pixels(), 0);
    assert_eq!(results[3].num_pixels(), 0);
}

#[test]
fn ordered_blending_respects_the_composite_order() {
    let options = ComposeOptions {
        ordered_composite: true,
        composite_mode: CompositeMode::AlphaBlend,
        interlace_images: false,
        ..ComposeOptions::default()
    };

    let results = run_world(4, move |comm| {
        let frame = FrameState {
            tiles: vec![Tile {
                display_node: 0,
                viewport: viewport(0),
            }],
            num_processes: 4,
            layout: PixelLayout::RGBA_F32,
            contrib_masks: vec![true; 4],
            composite_order: Some(vec![3, 2, 1, 0]),
        };
        let contributions = vec![Some(blend_image(comm.rank(), TILE_W, TILE_H))];

        let mut arena = BufferArena::new();
        reduce::compose(comm, &mut arena, &options, &frame, contributions).unwrap()
    });

    // Front to back is 3, 2, 1, 0.
    let inputs: Vec<_> = [3_usize, 2, 1, 0]
        .iter()
        .map(|&r| blend_image(r, TILE_W, TILE_H))
        .collect();
    assert_eq!(results[0], reference_composite(&inputs, CompositeMode::AlphaBlend));
}

#[test]
fn an_unrendered_frame_yields_blank_tiles() {
    let options = ComposeOptions::default();
    let results = run_world(4, move |comm| {
        let mut frame = two_tile_frame();
        frame.contrib_masks = vec![false; 8];

        let mut arena = BufferArena::new();
        reduce::compose(comm, &mut arena, &options, &frame, vec![None, None]).unwrap()
    });

    for rank in 0..2 {
        let result = &results[rank];
        assert_eq!((result.width(), result.height()), (TILE_W, TILE_H));
        assert!(result.color_plane().iter().all(|&b| b == 0));
        assert!(result.depth_plane().iter().all(|&d| d == 1.0));
    }
}

#[test]
fn a_tile_with_one_contributor_still_reaches_its_display() {
    // Rank 2 renders into tile 1 only; tile 0 is empty. The tile-1 group is
    // its display process, rank 1, which receives the single contribution.
    let options = ComposeOptions::default();
    let results = run_world(3, move |comm| {
        let frame = FrameState {
            tiles: vec![
                Tile {
                    display_node: 0,
                    viewport: viewport(0),
                },
                Tile {
                    display_node: 1,
                    viewport: viewport(TILE_W),
                },
            ],
            num_processes: 3,
            layout: PixelLayout::RGBA_U8_DEPTH,
            contrib_masks: vec![
                false, false, // rank 0
                false, false, // rank 1
                false, true, // rank 2
            ],
            composite_order: None,
        };
        let mut contributions = vec![None, None];
        if comm.rank() == 2 {
            contributions[1] = Some(depth_image(2, TILE_W, TILE_H));
        }

        let mut arena = BufferArena::new();
        reduce::compose(comm, &mut arena, &options, &frame, contributions).unwrap()
    });

    let mut tile1 = Image::new(TILE_W, TILE_H, PixelLayout::RGBA_U8_DEPTH);
    depth_image(2, TILE_W, TILE_H)
        .decompress_into(&mut tile1, 0)
        .unwrap();
    assert_eq!(results[1], tile1);

    // Rank 0 displays the empty tile 0 and must hand back a blank image of
    // the tile's size.
    assert_eq!((results[0].width(), results[0].height()), (TILE_W, TILE_H));
    assert!(results[0].depth_plane().iter().all(|&d| d == 1.0));
}
