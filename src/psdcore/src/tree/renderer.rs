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

//! The recursive compositor.
//!
//! Children are painted bottom-up into a canvas sized working buffer.
//! Isolated folders composite into their own buffer first and the
//! result is kept in a per-folder cache keyed by sequence id until
//! `set_dirty` invalidates it. Pass-through folders paint straight into
//! the parent buffer and are never cached, since their result depends
//! on the backdrop.

use std::collections::HashMap;

use tracing::debug;

use crate::paint::color::ALPHA_CHANNEL;
use crate::paint::rasterop::{mask_blend, pixel_blend};
use crate::paint::{Blendmode, Image8, Rectangle, TiledImage, TiledMask};

use super::layer::{Layer, LayerImage, LayerIndex};

/// Render call parameters.
pub struct RenderOptions {
    /// Sequence id of the sub-tree to composite; the root renders the
    /// whole canvas.
    pub from: i32,
    /// Force the final composite fully opaque
    pub opaque: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            from: super::SEQ_ID_ROOT,
            opaque: false,
        }
    }
}

/// The tree data a render call walks. Split from the renderer itself so
/// the cache can be borrowed mutably while the arena is read.
pub(crate) struct RenderCtx<'a> {
    pub arena: &'a [Layer],
    pub images: &'a HashMap<i32, LayerImage>,
}

struct CacheEntry {
    /// Region the cached composite is valid for
    rect: Rectangle,
    img: Image8,
    valid: bool,
}

pub(crate) struct Renderer {
    canvas_rect: Rectangle,
    cache: HashMap<i32, CacheEntry>,
    pool: Vec<Image8>,
}

impl Renderer {
    pub fn new(canvas_rect: Rectangle) -> Renderer {
        Renderer {
            canvas_rect,
            cache: HashMap::new(),
            pool: Vec::new(),
        }
    }

    /// Composite the sub-tree rooted at `from` into `dest`, restricted
    /// to `rect` (canvas coordinates). `dest` must be at least
    /// `rect.w` x `rect.h`; its origin maps to the rect's corner.
    pub fn render(
        &mut self,
        ctx: &RenderCtx,
        dest: &mut Image8,
        rect: &Rectangle,
        from: LayerIndex,
        opaque: bool,
    ) {
        assert!(dest.width >= rect.w as usize && dest.height >= rect.h as usize);
        let dest_local = Rectangle::new(0, 0, rect.w, rect.h);
        dest.clear_rect(&dest_local);

        if let Some(crect) = rect.intersected(&self.canvas_rect) {
            let layer = &ctx.arena[from];
            if layer.folder {
                if !layer.children.is_empty() {
                    self.ensure_folder_cache(ctx, from, &crect);
                    let entry = &self.cache[&layer.seq_id];
                    blit(dest, rect, &entry.img, &self.canvas_rect, &crect);
                }
            } else {
                let canvas = self.canvas_rect;
                let mut buf = self.acquire();
                buf.clear_rect(&local(&canvas, &crect));
                draw_pixel_layer(ctx, layer, &mut buf, &canvas, &crect);
                blit(dest, rect, &buf, &canvas, &crect);
                self.release(buf);
            }
        }

        if opaque {
            dest.remove_alpha(&dest_local);
        }
    }

    /// Mark a layer's cached composite, and those of all its ancestors,
    /// stale.
    pub fn set_dirty(&mut self, arena: &[Layer], by_seq: &HashMap<i32, LayerIndex>, seq_id: i32) {
        let mut idx = match by_seq.get(&seq_id) {
            Some(&i) => i,
            None => return,
        };
        debug!(seq_id, "invalidating cached composites");
        loop {
            let layer = &arena[idx];
            if let Some(entry) = self.cache.get_mut(&layer.seq_id) {
                entry.valid = false;
            }
            match layer.parent {
                Some(p) => idx = p,
                None => break,
            }
        }
    }

    /// Paint all of a folder's direct children into `buf`. Layers that
    /// participate in a clip stack are painted with their base.
    fn composite_children(
        &mut self,
        ctx: &RenderCtx,
        parent: LayerIndex,
        buf: &mut Image8,
        rect: &Rectangle,
    ) {
        for &child in &ctx.arena[parent].children {
            let layer = &ctx.arena[child];
            if !layer.visible || layer.clipped_by.is_some() {
                continue;
            }
            self.draw_child(ctx, child, buf, rect);
        }
    }

    fn draw_child(&mut self, ctx: &RenderCtx, idx: LayerIndex, buf: &mut Image8, rect: &Rectangle) {
        let layer = &ctx.arena[idx];
        if !layer.clip.is_empty() {
            self.draw_clip_group(ctx, idx, buf, rect);
        } else if layer.folder {
            if layer.children.is_empty() {
                return;
            }
            if layer.blendmode.is_pass_through() {
                self.composite_children(ctx, idx, buf, rect);
            } else {
                self.ensure_folder_cache(ctx, idx, rect);
                let entry = &self.cache[&layer.seq_id];
                blend_image(
                    buf,
                    &entry.img,
                    &self.canvas_rect,
                    rect,
                    layer.blendmode,
                    layer.opacity,
                    layer_mask(ctx, layer),
                );
            }
        } else {
            draw_pixel_layer(ctx, layer, buf, &self.canvas_rect, rect);
        }
    }

    /// Composite a clip stack base together with the layers clipped
    /// against it. The stack paints onto a transparent buffer, the
    /// buffer's alpha is then replaced by the base's own alpha, and the
    /// result blends into the parent with the base's mode, opacity and
    /// mask.
    fn draw_clip_group(
        &mut self,
        ctx: &RenderCtx,
        base_idx: LayerIndex,
        buf: &mut Image8,
        rect: &Rectangle,
    ) {
        let canvas = self.canvas_rect;
        let base = &ctx.arena[base_idx];

        let content = if base.folder {
            Some(*rect)
        } else {
            ctx.images
                .get(&base.seq_id)
                .and_then(|li| li.canvas.as_ref())
                .map(|c| c.rect())
        };
        let crect = match content.and_then(|r| r.intersected(rect)) {
            Some(r) => r,
            None => return,
        };

        let mut tmp = self.acquire();
        tmp.clear_rect(&local(&canvas, &crect));

        // The base's own blend mode, opacity and mask apply when the
        // finished group blends into the parent, not inside the group.
        if base.folder {
            self.composite_children(ctx, base_idx, &mut tmp, &crect);
        } else if let Some(img) = ctx.images.get(&base.seq_id).and_then(|li| li.canvas.as_ref()) {
            blend_tiled(&mut tmp, &canvas, img, None, &crect, Blendmode::Normal, 255);
        }

        let base_alpha = snapshot_alpha(&tmp, &canvas, &crect);

        for &clipper in &base.clip {
            if !ctx.arena[clipper].visible {
                continue;
            }
            self.draw_child(ctx, clipper, &mut tmp, &crect);
        }

        apply_clip_alpha(
            &mut tmp,
            &canvas,
            &crect,
            &base_alpha,
            base.blend_clipped_elements,
        );

        blend_image(
            buf,
            &tmp,
            &canvas,
            &crect,
            base.blendmode,
            base.opacity,
            layer_mask(ctx, base),
        );
        self.release(tmp);
    }

    /// Recompute a folder's cached composite unless the cache already
    /// covers the requested region.
    fn ensure_folder_cache(&mut self, ctx: &RenderCtx, idx: LayerIndex, rect: &Rectangle) {
        let seq = ctx.arena[idx].seq_id;
        if let Some(entry) = self.cache.get(&seq) {
            if entry.valid && entry.rect.contains(rect) {
                return;
            }
        }
        let canvas = self.canvas_rect;
        let mut img = match self.cache.remove(&seq) {
            Some(entry) => entry.img,
            None => self.acquire(),
        };
        img.clear_rect(&local(&canvas, rect));
        self.composite_children(ctx, idx, &mut img, rect);
        self.cache.insert(
            seq,
            CacheEntry {
                rect: *rect,
                img,
                valid: true,
            },
        );
    }

    // Canvas sized RGBA buffers are recycled through a free list.
    // Buffers come back stale; callers clear the region they composite.

    fn acquire(&mut self) -> Image8 {
        self.pool.pop().unwrap_or_else(|| {
            Image8::new(self.canvas_rect.w as usize, self.canvas_rect.h as usize)
        })
    }

    fn release(&mut self, img: Image8) {
        self.pool.push(img);
    }
}

/// Canvas coordinates -> buffer-local coordinates.
fn local(canvas: &Rectangle, r: &Rectangle) -> Rectangle {
    r.translated(-canvas.x, -canvas.y)
}

fn layer_mask<'a>(ctx: &RenderCtx<'a>, layer: &Layer) -> Option<&'a TiledMask> {
    if !layer.mask_enabled {
        return None;
    }
    ctx.images.get(&layer.seq_id).and_then(|li| li.mask.as_ref())
}

fn draw_pixel_layer(
    ctx: &RenderCtx,
    layer: &Layer,
    buf: &mut Image8,
    canvas: &Rectangle,
    rect: &Rectangle,
) {
    if let Some(img) = ctx.images.get(&layer.seq_id).and_then(|li| li.canvas.as_ref()) {
        blend_tiled(
            buf,
            canvas,
            img,
            layer_mask(ctx, layer),
            rect,
            layer.blendmode,
            layer.opacity,
        );
    }
}

/// Blend a tiled image into a canvas sized buffer over `region`.
fn blend_tiled(
    buf: &mut Image8,
    canvas: &Rectangle,
    img: &TiledImage,
    mask: Option<&TiledMask>,
    region: &Rectangle,
    mode: Blendmode,
    opacity: u8,
) {
    let area = match img.rect().intersected(region) {
        Some(r) => r,
        None => return,
    };
    let ts = img.tile_size() as i32;
    let mut mask_row = vec![0u8; ts as usize];

    for tj in area.y.div_euclid(ts)..=area.bottom().div_euclid(ts) {
        for ti in area.x.div_euclid(ts)..=area.right().div_euclid(ts) {
            let tile = match img.tile_at(ti, tj) {
                Some(t) => t,
                None => continue,
            };
            let tile_rect = img.tile_rect(ti, tj);
            let seg = match tile_rect.intersected(&area) {
                Some(r) => r,
                None => continue,
            };
            let tile_local = seg.translated(-tile_rect.x, -tile_rect.y);
            let buf_local = local(canvas, &seg);
            let rows = buf.rect_iter_mut(&buf_local).zip(tile.rect_iter(&tile_local));
            for (y, (drow, srow)) in (seg.y..).zip(rows) {
                match mask {
                    Some(m) => {
                        let mrow = &mut mask_row[..seg.w as usize];
                        m.fill_row(y, seg.x, seg.x + seg.w, mrow);
                        mask_blend(drow, srow, mrow, opacity, mode);
                    }
                    None => pixel_blend(drow, srow, opacity, mode),
                }
            }
        }
    }
}

/// Blend one canvas sized buffer into another over `region`.
fn blend_image(
    buf: &mut Image8,
    src: &Image8,
    canvas: &Rectangle,
    region: &Rectangle,
    mode: Blendmode,
    opacity: u8,
    mask: Option<&TiledMask>,
) {
    let lr = local(canvas, region);
    match mask {
        None => {
            for (drow, srow) in buf.rect_iter_mut(&lr).zip(src.rect_iter(&lr)) {
                pixel_blend(drow, srow, opacity, mode);
            }
        }
        Some(m) => {
            let mut mrow = vec![0u8; region.w as usize];
            let rows = buf.rect_iter_mut(&lr).zip(src.rect_iter(&lr));
            for (y, (drow, srow)) in (region.y..).zip(rows) {
                m.fill_row(y, region.x, region.x + region.w, &mut mrow);
                mask_blend(drow, srow, &mrow, opacity, mode);
            }
        }
    }
}

/// Copy a finished region into the caller's destination image.
fn blit(
    dest: &mut Image8,
    dest_rect: &Rectangle,
    src: &Image8,
    canvas: &Rectangle,
    region: &Rectangle,
) {
    let src_local = local(canvas, region);
    let dst_local = region.translated(-dest_rect.x, -dest_rect.y);
    for (drow, srow) in dest.rect_iter_mut(&dst_local).zip(src.rect_iter(&src_local)) {
        drow.copy_from_slice(srow);
    }
}

fn snapshot_alpha(img: &Image8, canvas: &Rectangle, region: &Rectangle) -> Vec<u8> {
    let lr = local(canvas, region);
    let mut out = Vec::with_capacity((region.w * region.h) as usize);
    for row in img.rect_iter(&lr) {
        out.extend(row.iter().map(|px| px[ALPHA_CHANNEL]));
    }
    out
}

/// Replace the clip group's alpha with the base's alpha: a direct copy
/// when the group blends its clipped elements, an element-wise min
/// otherwise.
fn apply_clip_alpha(
    img: &mut Image8,
    canvas: &Rectangle,
    region: &Rectangle,
    base_alpha: &[u8],
    blend_clipped: bool,
) {
    let lr = local(canvas, region);
    let mut i = 0;
    for row in img.rect_iter_mut(&lr) {
        for px in row {
            px[ALPHA_CHANNEL] = if blend_clipped {
                base_alpha[i]
            } else {
                px[ALPHA_CHANNEL].min(base_alpha[i])
            };
            i += 1;
        }
    }
}
