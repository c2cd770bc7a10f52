// This file is part of Psdpile.
// Copyright (C) 2022-2023 Calle Laakkonen
//
// Psdpile is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// As additional permission under section 7, you are allowed to distribute
// the software through an app store, even if that store has restrictive
// terms and conditions that are incompatible with the GPL, provided that
// the source is also available under the GPL with or without this permission
// through a channel without those restrictive terms and conditions.
//
// Psdpile is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Psdpile.  If not, see <https://www.gnu.org/licenses/>.

//! End to end composition through the public API with a stub decoder.

use std::collections::HashMap;

use psdcore::codec::{
    ColorMode, Config, DecodeOptions, Decoder, LayerRecord, MaskData, SectionType, CHANNEL_ALPHA,
    CHANNEL_BLUE, CHANNEL_GREEN, CHANNEL_RED, CHANNEL_USER_MASK,
};
use psdcore::paint::Image8;
use psdcore::{
    CancelToken, CompositeError, CompositeResult, Options, Pixel8, Rectangle, RenderOptions, Tree,
};

struct StubDecoder {
    config: Config,
    layers: Vec<LayerRecord>,
}

impl StubDecoder {
    fn new(w: i32, h: i32, layers: Vec<LayerRecord>) -> StubDecoder {
        StubDecoder {
            config: Config {
                rect: Rectangle::new(0, 0, w, h),
                color_mode: ColorMode::Rgb,
                depth: 8,
            },
            layers,
        }
    }
}

impl Decoder for StubDecoder {
    fn decode(&mut self, opts: &mut DecodeOptions) -> CompositeResult<Config> {
        if let Some(cb) = opts.config_loaded.as_mut() {
            cb(&self.config)?;
        }
        let total = self.layers.len();
        for (index, rec) in self.layers.drain(..).enumerate() {
            if let Some(cb) = opts.layer_image_loaded.as_mut() {
                cb(rec, index, total);
            }
        }
        Ok(self.config.clone())
    }
}

fn pixel_layer(seq_id: i32, rect: Rectangle, pixels: &[Pixel8]) -> LayerRecord {
    assert_eq!(pixels.len(), (rect.w * rect.h) as usize);
    let mut channels = HashMap::new();
    for (key, c) in [
        (CHANNEL_RED, 0),
        (CHANNEL_GREEN, 1),
        (CHANNEL_BLUE, 2),
        (CHANNEL_ALPHA, 3),
    ] {
        channels.insert(key, pixels.iter().map(|p| p[c]).collect());
    }
    LayerRecord {
        seq_id,
        name: format!("layer {}", seq_id).into_bytes(),
        rect: Some(rect),
        section: SectionType::Other,
        blend_key: *b"norm",
        opacity: 255,
        visible: true,
        blend_clipped_elements: true,
        channels,
        ..LayerRecord::default()
    }
}

fn fill_layer(seq_id: i32, rect: Rectangle, color: Pixel8) -> LayerRecord {
    pixel_layer(seq_id, rect, &vec![color; (rect.w * rect.h) as usize])
}

fn folder(seq_id: i32, blend_key: &[u8; 4]) -> LayerRecord {
    LayerRecord {
        seq_id,
        name: format!("folder {}", seq_id).into_bytes(),
        section: SectionType::OpenFolder,
        blend_key: *blend_key,
        opacity: 255,
        visible: true,
        blend_clipped_elements: true,
        ..LayerRecord::default()
    }
}

fn divider() -> LayerRecord {
    LayerRecord {
        seq_id: 0,
        section: SectionType::Divider,
        blend_key: *b"norm",
        visible: true,
        blend_clipped_elements: true,
        ..LayerRecord::default()
    }
}

fn load_tree(w: i32, h: i32, layers: Vec<LayerRecord>) -> Tree {
    let mut decoder = StubDecoder::new(w, h, layers);
    Tree::load(&mut decoder, None, &Options::default()).unwrap()
}

/// Render the document area; the tree's canvas rect is one pixel
/// wider and taller than the document because of the conservative
/// transform coverage.
fn render_area(tree: &mut Tree, w: i32, h: i32) -> Vec<Pixel8> {
    let rect = Rectangle::new(0, 0, w, h);
    let mut img = Image8::new(w as usize, h as usize);
    tree.render(&mut img, &rect, &RenderOptions::default());
    img.pixels
}

const RED: Pixel8 = [255, 0, 0, 255];
const GREEN: Pixel8 = [0, 255, 0, 255];
const BLUE: Pixel8 = [0, 0, 255, 255];
const WHITE: Pixel8 = [255, 255, 255, 255];
const BLACK: Pixel8 = [0, 0, 0, 255];
const CLEAR: Pixel8 = [0, 0, 0, 0];

#[test]
fn test_multiply_over_red() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut top = fill_layer(2, rect, GREEN);
    top.blend_key = *b"mul ";
    let mut tree = load_tree(2, 1, vec![fill_layer(1, rect, RED), top]);
    assert_eq!(render_area(&mut tree, 2, 1), vec![BLACK, BLACK]);
}

#[test]
fn test_screen_over_red() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut top = fill_layer(2, rect, GREEN);
    top.blend_key = *b"scrn";
    let mut tree = load_tree(2, 1, vec![fill_layer(1, rect, RED), top]);
    assert_eq!(render_area(&mut tree, 2, 1), vec![[255, 255, 0, 255]; 2]);
}

#[test]
fn test_opacity_blends() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut top = fill_layer(2, rect, GREEN);
    top.opacity = 128;
    let mut tree = load_tree(1, 1, vec![fill_layer(1, rect, RED), top]);
    assert_eq!(render_area(&mut tree, 1, 1), vec![[127, 128, 0, 255]]);
}

#[test]
fn test_pass_through_folder_equals_flat() {
    let rect = Rectangle::new(0, 0, 2, 1);

    let mut mul_red = fill_layer(2, rect, RED);
    mul_red.blend_key = *b"mul ";
    let mut add_blue = fill_layer(3, rect, BLUE);
    add_blue.blend_key = *b"lddg";

    let mut grouped = load_tree(
        2,
        1,
        vec![
            fill_layer(1, rect, WHITE),
            folder(10, b"pass"),
            mul_red.clone(),
            add_blue.clone(),
            divider(),
        ],
    );
    let mut flat = load_tree(2, 1, vec![fill_layer(1, rect, WHITE), mul_red, add_blue]);

    let grouped_px = render_area(&mut grouped, 2, 1);
    let flat_px = render_area(&mut flat, 2, 1);
    assert_eq!(grouped_px, flat_px);
    assert_eq!(grouped_px, vec![[255, 0, 255, 255]; 2]);
}

#[test]
fn test_isolated_folder_blend() {
    // An isolated Multiply folder of a single green layer over red
    // behaves like the green layer multiplied directly.
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut tree = load_tree(
        2,
        1,
        vec![
            fill_layer(1, rect, RED),
            folder(10, b"mul "),
            fill_layer(2, rect, GREEN),
            divider(),
        ],
    );
    assert_eq!(render_area(&mut tree, 2, 1), vec![BLACK, BLACK]);
}

#[test]
fn test_clipping_group() {
    let rect = Rectangle::new(0, 0, 2, 1);
    // base with coverage only in the first pixel
    let base = pixel_layer(1, rect, &[[0, 0, 255, 255], [0, 0, 255, 0]]);
    let mut clipper = fill_layer(2, rect, RED);
    clipper.clipping = true;

    let mut tree = load_tree(2, 1, vec![base, clipper]);
    assert_eq!(render_area(&mut tree, 2, 1), vec![RED, CLEAR]);
}

#[test]
fn test_clipper_without_base_below_is_ignored() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut clipper = fill_layer(1, rect, RED);
    clipper.clipping = true;
    let mut tree = load_tree(1, 1, vec![clipper, fill_layer(2, rect, GREEN)]);
    // the baseless clipper paints as a plain layer under the green one
    assert_eq!(render_area(&mut tree, 1, 1), vec![GREEN]);
}

#[test]
fn test_mask_default_color() {
    let rect = Rectangle::new(0, 0, 4, 1);
    let mask_rect = Rectangle::new(0, 0, 2, 1);

    for (default_color, expected) in [
        (255u8, vec![RED, CLEAR, RED, RED]),
        (0u8, vec![RED, CLEAR, CLEAR, CLEAR]),
    ] {
        let mut layer = fill_layer(1, rect, RED);
        layer.mask = Some(MaskData {
            rect: mask_rect,
            default_color,
            disabled: false,
        });
        layer.channels.insert(CHANNEL_USER_MASK, vec![255, 0]);

        let mut tree = load_tree(4, 1, vec![layer]);
        assert_eq!(render_area(&mut tree, 4, 1), expected, "default {}", default_color);
    }
}

#[test]
fn test_disabled_mask_is_ignored() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut layer = fill_layer(1, rect, RED);
    layer.mask = Some(MaskData {
        rect: Rectangle::new(0, 0, 2, 1),
        default_color: 0,
        disabled: true,
    });
    layer.channels.insert(CHANNEL_USER_MASK, vec![0, 0]);
    let mut tree = load_tree(2, 1, vec![layer]);
    assert_eq!(render_area(&mut tree, 2, 1), vec![RED, RED]);
}

#[test]
fn test_invisible_layer_is_skipped() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut top = fill_layer(2, rect, GREEN);
    top.visible = false;
    let mut tree = load_tree(1, 1, vec![fill_layer(1, rect, RED), top]);
    assert_eq!(render_area(&mut tree, 1, 1), vec![RED]);
}

#[test]
fn test_clone_renders_identically() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut top = fill_layer(2, rect, GREEN);
    top.blend_key = *b"sLit";
    top.opacity = 200;
    let mut tree = load_tree(2, 1, vec![fill_layer(1, rect, RED), top]);
    let mut copy = tree.clone();
    assert_eq!(render_area(&mut tree, 2, 1), render_area(&mut copy, 2, 1));
}

#[test]
fn test_render_is_deterministic() {
    let rect = Rectangle::new(0, 0, 3, 2);
    let build = || {
        let mut top = fill_layer(2, rect, [13, 77, 200, 180]);
        top.blend_key = *b"over";
        vec![fill_layer(1, rect, [200, 40, 90, 255]), top]
    };
    let mut a = load_tree(3, 2, build());
    let mut b = load_tree(3, 2, build());
    assert_eq!(render_area(&mut a, 3, 2), render_area(&mut b, 3, 2));
}

#[test]
fn test_sub_region_render() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut tree = load_tree(2, 1, vec![pixel_layer(1, rect, &[RED, GREEN])]);

    let sub = Rectangle::new(1, 0, 1, 1);
    let mut img = Image8::new(1, 1);
    tree.render(&mut img, &sub, &RenderOptions::default());
    assert_eq!(img.pixels, vec![GREEN]);
}

#[test]
fn test_render_outside_canvas_is_transparent() {
    let rect = Rectangle::new(0, 0, 2, 1);
    let mut tree = load_tree(2, 1, vec![fill_layer(1, rect, RED)]);

    let wide = Rectangle::new(-1, 0, 4, 2);
    let mut img = Image8::new(4, 2);
    img.pixels.fill([9, 9, 9, 9]);
    tree.render(&mut img, &wide, &RenderOptions::default());
    assert_eq!(img.pixels[0], CLEAR);
    assert_eq!(img.pixels[1], RED);
    assert_eq!(img.pixels[2], RED);
    assert_eq!(img.pixels[3], CLEAR);
    assert_eq!(&img.pixels[4..], &[CLEAR; 4]);
}

#[test]
fn test_render_from_sub_tree() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut tree = load_tree(
        1,
        1,
        vec![
            fill_layer(1, rect, RED),
            folder(10, b"norm"),
            fill_layer(2, rect, GREEN),
            divider(),
        ],
    );

    let area = Rectangle::new(0, 0, 1, 1);
    let mut img = Image8::new(1, 1);
    tree.render(
        &mut img,
        &area,
        &RenderOptions {
            from: 10,
            ..RenderOptions::default()
        },
    );
    assert_eq!(img.pixels, vec![GREEN]);

    tree.render(
        &mut img,
        &area,
        &RenderOptions {
            from: 1,
            ..RenderOptions::default()
        },
    );
    assert_eq!(img.pixels, vec![RED]);
}

#[test]
fn test_opaque_render_removes_alpha() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut tree = load_tree(1, 1, vec![fill_layer(1, rect, [255, 0, 0, 128])]);

    let area = Rectangle::new(0, 0, 1, 1);
    let mut img = Image8::new(1, 1);
    tree.render(
        &mut img,
        &area,
        &RenderOptions {
            opaque: true,
            ..RenderOptions::default()
        },
    );
    assert_eq!(img.pixels[0][3], 255);
}

#[test]
fn test_set_dirty_invalidates_cache() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let mut tree = load_tree(1, 1, vec![fill_layer(1, rect, RED), fill_layer(2, rect, GREEN)]);

    assert_eq!(render_area(&mut tree, 1, 1), vec![GREEN]);

    tree.layer_mut(2).unwrap().visible = false;
    // without set_dirty the cached composite is still served
    assert_eq!(render_area(&mut tree, 1, 1), vec![GREEN]);

    tree.set_dirty(2);
    assert_eq!(render_area(&mut tree, 1, 1), vec![RED]);
}

#[test]
fn test_unsupported_color_mode() {
    let mut decoder = StubDecoder::new(1, 1, vec![]);
    decoder.config.color_mode = ColorMode::Cmyk;
    let err = Tree::load(&mut decoder, None, &Options::default());
    assert!(matches!(err, Err(CompositeError::UnsupportedColorMode)));
}

#[test]
fn test_cancelled_load() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let token = CancelToken::new();
    token.cancel();
    let mut decoder = StubDecoder::new(1, 1, vec![fill_layer(1, rect, RED)]);
    let err = Tree::load(&mut decoder, Some(&token), &Options::default());
    assert!(matches!(err, Err(CompositeError::Cancelled)));
}

#[test]
fn test_tree_shape() {
    let rect = Rectangle::new(0, 0, 1, 1);
    let tree = load_tree(
        1,
        1,
        vec![
            fill_layer(1, rect, RED),
            folder(10, b"norm"),
            fill_layer(2, rect, GREEN),
            divider(),
        ],
    );

    assert_eq!(tree.root().children.len(), 2);
    let folder_layer = tree.layer(10).unwrap();
    assert!(folder_layer.folder);
    assert_eq!(folder_layer.children.len(), 1);
    assert_eq!(tree.layer(2).unwrap().name, "layer 2");
    // canvas and content both carry the conservative coverage padding
    assert_eq!(tree.canvas_rect(), Rectangle::new(0, 0, 2, 2));
    assert_eq!(tree.rect(), Some(Rectangle::new(0, 0, 2, 2)));
    // tiles exist for the layer content
    let li = tree.layer_image(1).unwrap();
    assert!(li.canvas.is_some());
    assert!(li.mask.is_none());
}
