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

//! The layer tree facade: loading, cloning, transforming and rendering.

use std::collections::HashMap;
use std::ops::Range;
use std::thread;

use crate::codec::{default_encoding_detector, Decoder, EncodingDetector};
use crate::paint::xform::transform_rect;
use crate::paint::{Aff3, GammaTable, Image8, Rectangle};
use crate::parallel::ParallelContext;
use crate::CompositeResult;

mod builder;
mod canvas;
mod layer;
mod renderer;

pub use crate::parallel::CancelToken;
pub use layer::{Layer, LayerImage, LayerIndex, SEQ_ID_ROOT};
pub use renderer::RenderOptions;

use renderer::{RenderCtx, Renderer};

pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Load time options.
#[derive(Clone, Default)]
pub struct Options {
    /// Tile edge length; 0 selects [`DEFAULT_TILE_SIZE`]
    pub tile_size: u32,

    /// Affine transform applied to all layer pixels while tiling.
    /// Zero diagonal entries are filled in with 1, so the zero matrix
    /// becomes the identity; a caller wanting a rotation-only matrix
    /// must pass every entry explicitly.
    pub transform: Aff3,

    /// Gamma for transform resampling; 0 disables gamma correction
    pub gamma: f64,

    /// Character set detector for legacy layer names; defaults to
    /// treating names as UTF-8
    pub layer_name_detector: Option<EncodingDetector>,
}

/// An immutable, tiled rendition of a decoded document.
///
/// Loading and transforming are the only operations that build pixel
/// data; afterwards the tree only ever reads it. Cloning is cheap
/// because layer images are shared between the clones.
pub struct Tree {
    tile_size: u32,
    arena: Vec<Layer>,
    by_seq: HashMap<i32, LayerIndex>,
    images: HashMap<i32, LayerImage>,
    canvas_rect: Rectangle,
    rect: Option<Rectangle>,
    renderer: Renderer,
}

impl Tree {
    /// Build a layer tree by driving the host's decoder.
    pub fn load<D: Decoder + ?Sized>(
        decoder: &mut D,
        token: Option<&CancelToken>,
        opts: &Options,
    ) -> CompositeResult<Tree> {
        let tile_size = if opts.tile_size == 0 {
            DEFAULT_TILE_SIZE
        } else {
            opts.tile_size
        };
        let mut m = opts.transform;
        if m[0] == 0.0 {
            m[0] = 1.0;
        }
        if m[4] == 0.0 {
            m[4] = 1.0;
        }
        let gamma = (opts.gamma != 0.0).then(|| GammaTable::new(opts.gamma));
        let detector = opts
            .layer_name_detector
            .unwrap_or(default_encoding_detector);

        let loaded = canvas::create_canvas(decoder, token, tile_size, &m, gamma.as_ref())?;
        let built = builder::build_tree(&loaded.records, &loaded.images, detector);
        let rect = built
            .content_rect
            .and_then(|r| r.intersected(&loaded.canvas_rect));

        Ok(Tree {
            tile_size,
            arena: built.arena,
            by_seq: built.by_seq,
            images: loaded.images,
            canvas_rect: loaded.canvas_rect,
            rect,
            renderer: Renderer::new(loaded.canvas_rect),
        })
    }

    /// The document rectangle, after the load time transform.
    pub fn canvas_rect(&self) -> Rectangle {
        self.canvas_rect
    }

    /// Bounding union of visible layer content, clipped to the canvas.
    pub fn rect(&self) -> Option<Rectangle> {
        self.rect
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn root(&self) -> &Layer {
        &self.arena[0]
    }

    pub fn layer(&self, seq_id: i32) -> Option<&Layer> {
        self.by_seq.get(&seq_id).map(|&i| &self.arena[i])
    }

    /// Mutable access for hosts toggling presentation fields such as
    /// visibility. Follow any change with [`Tree::set_dirty`] so stale
    /// cached composites are dropped.
    pub fn layer_mut(&mut self, seq_id: i32) -> Option<&mut Layer> {
        match self.by_seq.get(&seq_id) {
            Some(&i) => Some(&mut self.arena[i]),
            None => None,
        }
    }

    pub fn layer_at(&self, index: LayerIndex) -> &Layer {
        &self.arena[index]
    }

    pub fn layer_image(&self, seq_id: i32) -> Option<&LayerImage> {
        self.images.get(&seq_id)
    }

    /// Composite the sub-tree selected by `opts.from` into `dest`,
    /// restricted to `rect` in canvas coordinates. The destination must
    /// measure at least `rect.w` x `rect.h` pixels; its origin maps to
    /// the rectangle's top left corner.
    ///
    /// Rendering is not safe for concurrent calls on the same tree (the
    /// cache is mutated), but independent trees render independently.
    pub fn render(&mut self, dest: &mut Image8, rect: &Rectangle, opts: &RenderOptions) {
        let from = match self.by_seq.get(&opts.from) {
            Some(&i) => i,
            None => {
                dest.clear_rect(&Rectangle::new(0, 0, rect.w, rect.h));
                return;
            }
        };
        let ctx = RenderCtx {
            arena: &self.arena,
            images: &self.images,
        };
        self.renderer.render(&ctx, dest, rect, from, opts.opaque);
    }

    /// Mark a layer's cached composite, and transitively its
    /// ancestors', stale.
    pub fn set_dirty(&mut self, seq_id: i32) {
        self.renderer.set_dirty(&self.arena, &self.by_seq, seq_id);
    }

    /// Create a copy of this tree transformed by `m`.
    ///
    /// This takes time because every layer image is rebuilt through the
    /// transform; the work is split over the available parallelism.
    /// Cancellation discards the partial result.
    pub fn transform(
        &self,
        token: Option<&CancelToken>,
        m: &Aff3,
        gamma: f64,
    ) -> CompositeResult<Tree> {
        let gt = (gamma != 0.0).then(|| GammaTable::new(gamma));

        let entries: Vec<(i32, &LayerImage)> = self.images.iter().map(|(k, v)| (*k, v)).collect();
        let count = entries.len();
        let mut n = thread::available_parallelism().map_or(1, |n| n.get());
        while n > 1 && n * 2 > count {
            n -= 1;
        }

        let pc = ParallelContext::new(token, HashMap::new());
        thread::scope(|s| {
            let step = count / n;
            let mut idx = 0;
            for i in 0..n {
                let end = if i == n - 1 { count } else { idx + step };
                let range = idx..end;
                idx = end;
                let pc = &pc;
                let entries = &entries;
                let gt = gt.as_ref();
                s.spawn(move || transform_worker(pc, entries, range, m, gt));
            }
        });
        let images = pc.finish()?;

        let canvas_rect = transform_rect(&self.canvas_rect, m);
        Ok(Tree {
            tile_size: self.tile_size,
            arena: self.arena.clone(),
            by_seq: self.by_seq.clone(),
            images,
            canvas_rect,
            rect: self.rect.map(|r| transform_rect(&r, m)),
            renderer: Renderer::new(canvas_rect),
        })
    }
}

impl Clone for Tree {
    /// Required memory is not very large because the layer images share
    /// tile storage with the original. The clone starts with an empty
    /// render cache.
    fn clone(&self) -> Tree {
        Tree {
            tile_size: self.tile_size,
            arena: self.arena.clone(),
            by_seq: self.by_seq.clone(),
            images: self.images.clone(),
            canvas_rect: self.canvas_rect,
            rect: self.rect,
            renderer: Renderer::new(self.canvas_rect),
        }
    }
}

fn transform_worker(
    pc: &ParallelContext<'_, HashMap<i32, LayerImage>>,
    entries: &[(i32, &LayerImage)],
    range: Range<usize>,
    m: &Aff3,
    gt: Option<&GammaTable>,
) {
    for i in range {
        if pc.aborted() {
            return;
        }
        let (seq_id, li) = entries[i];
        let mut out = LayerImage::default();
        if let Some(canvas) = &li.canvas {
            match canvas.transform(pc.token(), m, gt) {
                Ok(t) => out.canvas = Some(t),
                Err(err) => {
                    pc.record(err);
                    return;
                }
            }
        }
        if let Some(mask) = &li.mask {
            match mask.transform(pc.token(), m) {
                Ok(t) => out.mask = Some(t),
                Err(err) => {
                    pc.record(err);
                    return;
                }
            }
        }
        pc.lock_results().insert(seq_id, out);
    }
}
