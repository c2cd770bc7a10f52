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

//! Tiled storage for a layer's pixel content and mask.
//!
//! A tiled image covers its rectangle with fixed size square tiles laid
//! on a grid aligned to canvas coordinates. Every tile overlapping the
//! rectangle exists; no tile outside it does. Tiles are immutable after
//! construction and shared by reference between tree clones.

use std::collections::HashMap;

use crate::parallel::CancelToken;
use crate::{CompositeError, CompositeResult};

use super::color::{Pixel8, ZERO_PIXEL8};
use super::tile::{ImageTile, MaskTile};
use super::xform::{apply, invert, is_identity, transform_rect, Aff3, GammaTable};
use super::Rectangle;

/// Tile grid index range (inclusive) covering a rectangle.
fn tile_span(rect: &Rectangle, size: i32) -> (i32, i32, i32, i32) {
    (
        rect.x.div_euclid(size),
        rect.y.div_euclid(size),
        rect.right().div_euclid(size),
        rect.bottom().div_euclid(size),
    )
}

/// The canvas square covered by the tile at grid index (i, j).
fn grid_rect(i: i32, j: i32, size: i32) -> Rectangle {
    Rectangle::new(i * size, j * size, size, size)
}

fn check_cancel(token: Option<&CancelToken>) -> CompositeResult<()> {
    if token.map_or(false, |t| t.is_cancelled()) {
        Err(CompositeError::Cancelled)
    } else {
        Ok(())
    }
}

fn inverted(m: &Aff3) -> CompositeResult<Aff3> {
    invert(m).ok_or_else(|| CompositeError::TileBuildError("singular transform matrix".into()))
}

#[derive(Clone)]
pub struct TiledImage {
    rect: Rectangle,
    tile_size: u32,
    tiles: HashMap<(i32, i32), ImageTile>,
}

impl TiledImage {
    /// Build a tiled image from raw 8 bit channel planes, optionally
    /// resampled through an affine transform and a gamma table.
    ///
    /// The channel planes are row major over `src_rect`. A missing
    /// alpha plane means fully opaque. With an identity transform the
    /// planes are copied sample for sample; otherwise destination
    /// pixels are back-projected through the inverted matrix and
    /// sampled bilinearly, in linear space when a gamma table is given.
    pub fn new_scaled(
        token: Option<&CancelToken>,
        tile_size: u32,
        src_rect: &Rectangle,
        r: &[u8],
        g: &[u8],
        b: &[u8],
        a: Option<&[u8]>,
        m: &Aff3,
        gamma: Option<&GammaTable>,
    ) -> CompositeResult<TiledImage> {
        let w = src_rect.w as usize;
        let h = src_rect.h as usize;
        let n = w * h;
        if r.len() < n || g.len() < n || b.len() < n || a.map_or(false, |a| a.len() < n) {
            return Err(CompositeError::TileBuildError(format!(
                "channel plane shorter than layer rectangle {}x{}",
                w, h
            )));
        }

        // The destination always goes through transform_rect, identity
        // included, so the conservative expansion pads a transparent
        // row and column past the source data.
        let identity = is_identity(m);
        let dest_rect = transform_rect(src_rect, m);
        let inv = inverted(m)?;

        let ts = tile_size as i32;
        let mut tiles = HashMap::new();
        let (tx0, ty0, tx1, ty1) = tile_span(&dest_rect, ts);
        for tj in ty0..=ty1 {
            for ti in tx0..=tx1 {
                check_cancel(token)?;
                let tile_rect = grid_rect(ti, tj, ts);
                let span = tile_rect.intersected(&dest_rect).unwrap();
                let mut pixels = vec![ZERO_PIXEL8; (ts * ts) as usize];
                for y in span.y..=span.bottom() {
                    let row = ((y - tile_rect.y) * ts - tile_rect.x) as isize;
                    for x in span.x..=span.right() {
                        let px = if identity {
                            let sx = x - src_rect.x;
                            let sy = y - src_rect.y;
                            if sx < src_rect.w && sy < src_rect.h {
                                let i = sy as usize * w + sx as usize;
                                [r[i], g[i], b[i], a.map_or(255, |a| a[i])]
                            } else {
                                ZERO_PIXEL8
                            }
                        } else {
                            let (sx, sy) = apply(&inv, x as f64 + 0.5, y as f64 + 0.5);
                            sample_planes(
                                r,
                                g,
                                b,
                                a,
                                w,
                                h,
                                sx - 0.5 - src_rect.x as f64,
                                sy - 0.5 - src_rect.y as f64,
                                gamma,
                            )
                        };
                        pixels[(row + x as isize) as usize] = px;
                    }
                }
                tiles.insert((ti, tj), ImageTile::from_vec(tile_size, pixels));
            }
        }

        Ok(TiledImage {
            rect: dest_rect,
            tile_size,
            tiles,
        })
    }

    /// Re-tile this image through an affine transform.
    pub fn transform(
        &self,
        token: Option<&CancelToken>,
        m: &Aff3,
        gamma: Option<&GammaTable>,
    ) -> CompositeResult<TiledImage> {
        let dest_rect = transform_rect(&self.rect, m);
        let inv = inverted(m)?;

        let ts = self.tile_size as i32;
        let mut tiles = HashMap::new();
        let (tx0, ty0, tx1, ty1) = tile_span(&dest_rect, ts);
        for tj in ty0..=ty1 {
            for ti in tx0..=tx1 {
                check_cancel(token)?;
                let tile_rect = grid_rect(ti, tj, ts);
                let span = tile_rect.intersected(&dest_rect).unwrap();
                let mut pixels = vec![ZERO_PIXEL8; (ts * ts) as usize];
                for y in span.y..=span.bottom() {
                    let row = ((y - tile_rect.y) * ts - tile_rect.x) as isize;
                    for x in span.x..=span.right() {
                        let (sx, sy) = apply(&inv, x as f64 + 0.5, y as f64 + 0.5);
                        pixels[(row + x as isize) as usize] =
                            self.sample(sx - 0.5, sy - 0.5, gamma);
                    }
                }
                tiles.insert((ti, tj), ImageTile::from_vec(self.tile_size, pixels));
            }
        }

        Ok(TiledImage {
            rect: dest_rect,
            tile_size: self.tile_size,
            tiles,
        })
    }

    pub fn rect(&self) -> Rectangle {
        self.rect
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tile_at(&self, i: i32, j: i32) -> Option<&ImageTile> {
        self.tiles.get(&(i, j))
    }

    /// The canvas square covered by the tile at grid index (i, j).
    pub fn tile_rect(&self, i: i32, j: i32) -> Rectangle {
        grid_rect(i, j, self.tile_size as i32)
    }

    /// The pixel at a canvas coordinate; transparent outside the rect.
    pub fn pixel_at(&self, x: i32, y: i32) -> Pixel8 {
        if !self.rect.contains_point(x, y) {
            return ZERO_PIXEL8;
        }
        let ts = self.tile_size as i32;
        match self.tiles.get(&(x.div_euclid(ts), y.div_euclid(ts))) {
            Some(tile) => tile.pixel_at(x.rem_euclid(ts) as u32, y.rem_euclid(ts) as u32),
            None => ZERO_PIXEL8,
        }
    }

    fn sample(&self, fx: f64, fy: f64, gamma: Option<&GammaTable>) -> Pixel8 {
        let x0 = fx.floor();
        let y0 = fy.floor();
        let xw = fx - x0;
        let yw = fy - y0;
        let x0 = x0 as i32;
        let y0 = y0 as i32;
        let corners = [
            (self.pixel_at(x0, y0), (1.0 - xw) * (1.0 - yw)),
            (self.pixel_at(x0 + 1, y0), xw * (1.0 - yw)),
            (self.pixel_at(x0, y0 + 1), (1.0 - xw) * yw),
            (self.pixel_at(x0 + 1, y0 + 1), xw * yw),
        ];
        let mut out = ZERO_PIXEL8;
        for c in 0..3 {
            let acc: f64 = corners
                .iter()
                .map(|(px, w)| match gamma {
                    Some(gt) => gt.to_linear(px[c]) * w,
                    None => px[c] as f64 / 255.0 * w,
                })
                .sum();
            out[c] = match gamma {
                Some(gt) => gt.from_linear(acc),
                None => (acc * 255.0 + 0.5) as u8,
            };
        }
        let alpha: f64 = corners.iter().map(|(px, w)| px[3] as f64 * w).sum();
        out[3] = (alpha + 0.5) as u8;
        out
    }
}

/// Bilinear sample of raw channel planes at a fractional source
/// position. Outside the planes the image is transparent.
#[allow(clippy::too_many_arguments)]
fn sample_planes(
    r: &[u8],
    g: &[u8],
    b: &[u8],
    a: Option<&[u8]>,
    w: usize,
    h: usize,
    fx: f64,
    fy: f64,
    gamma: Option<&GammaTable>,
) -> Pixel8 {
    if fx <= -1.0 || fy <= -1.0 || fx >= w as f64 || fy >= h as f64 {
        return ZERO_PIXEL8;
    }
    let x0 = fx.floor();
    let y0 = fy.floor();
    let xw = fx - x0;
    let yw = fy - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let weights = [
        (x0, y0, (1.0 - xw) * (1.0 - yw)),
        (x0 + 1, y0, xw * (1.0 - yw)),
        (x0, y0 + 1, (1.0 - xw) * yw),
        (x0 + 1, y0 + 1, xw * yw),
    ];

    let mut acc = [0.0f64; 3];
    let mut alpha = 0.0f64;
    for &(x, y, wt) in &weights {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            continue;
        }
        let i = y as usize * w + x as usize;
        alpha += a.map_or(255.0, |a| a[i] as f64) * wt;
        for (c, plane) in [r, g, b].iter().enumerate() {
            acc[c] += match gamma {
                Some(gt) => gt.to_linear(plane[i]) * wt,
                None => plane[i] as f64 / 255.0 * wt,
            };
        }
    }

    let mut out = ZERO_PIXEL8;
    for c in 0..3 {
        out[c] = match gamma {
            Some(gt) => gt.from_linear(acc[c]),
            None => (acc[c] * 255.0 + 0.5) as u8,
        };
    }
    out[3] = (alpha + 0.5).min(255.0) as u8;
    out
}

#[derive(Clone)]
pub struct TiledMask {
    rect: Rectangle,
    tile_size: u32,
    default_color: u8,
    tiles: HashMap<(i32, i32), MaskTile>,
}

impl TiledMask {
    /// Build a tiled mask from a raw 8 bit channel plane. Pixels
    /// outside the mask rectangle take the mask default color.
    pub fn new_scaled(
        token: Option<&CancelToken>,
        tile_size: u32,
        src_rect: &Rectangle,
        data: &[u8],
        default_color: u8,
        m: &Aff3,
    ) -> CompositeResult<TiledMask> {
        let w = src_rect.w as usize;
        let h = src_rect.h as usize;
        if data.len() < w * h {
            return Err(CompositeError::TileBuildError(format!(
                "mask plane shorter than mask rectangle {}x{}",
                w, h
            )));
        }

        // The destination always goes through transform_rect, identity
        // included; the expansion row and column take the default color.
        let identity = is_identity(m);
        let dest_rect = transform_rect(src_rect, m);
        let inv = inverted(m)?;

        let ts = tile_size as i32;
        let mut tiles = HashMap::new();
        let (tx0, ty0, tx1, ty1) = tile_span(&dest_rect, ts);
        for tj in ty0..=ty1 {
            for ti in tx0..=tx1 {
                check_cancel(token)?;
                let tile_rect = grid_rect(ti, tj, ts);
                let span = tile_rect.intersected(&dest_rect).unwrap();
                let mut pixels = vec![default_color; (ts * ts) as usize];
                for y in span.y..=span.bottom() {
                    let row = ((y - tile_rect.y) * ts - tile_rect.x) as isize;
                    for x in span.x..=span.right() {
                        let v = if identity {
                            let sx = x - src_rect.x;
                            let sy = y - src_rect.y;
                            if sx < src_rect.w && sy < src_rect.h {
                                data[sy as usize * w + sx as usize]
                            } else {
                                default_color
                            }
                        } else {
                            let (sx, sy) = apply(&inv, x as f64 + 0.5, y as f64 + 0.5);
                            sample_mask_plane(
                                data,
                                w,
                                h,
                                sx - 0.5 - src_rect.x as f64,
                                sy - 0.5 - src_rect.y as f64,
                                default_color,
                            )
                        };
                        pixels[(row + x as isize) as usize] = v;
                    }
                }
                tiles.insert((ti, tj), MaskTile::from_vec(tile_size, pixels));
            }
        }

        Ok(TiledMask {
            rect: dest_rect,
            tile_size,
            default_color,
            tiles,
        })
    }

    /// Re-tile this mask through an affine transform.
    pub fn transform(&self, token: Option<&CancelToken>, m: &Aff3) -> CompositeResult<TiledMask> {
        let dest_rect = transform_rect(&self.rect, m);
        let inv = inverted(m)?;

        let ts = self.tile_size as i32;
        let mut tiles = HashMap::new();
        let (tx0, ty0, tx1, ty1) = tile_span(&dest_rect, ts);
        for tj in ty0..=ty1 {
            for ti in tx0..=tx1 {
                check_cancel(token)?;
                let tile_rect = grid_rect(ti, tj, ts);
                let span = tile_rect.intersected(&dest_rect).unwrap();
                let mut pixels = vec![self.default_color; (ts * ts) as usize];
                for y in span.y..=span.bottom() {
                    let row = ((y - tile_rect.y) * ts - tile_rect.x) as isize;
                    for x in span.x..=span.right() {
                        let (sx, sy) = apply(&inv, x as f64 + 0.5, y as f64 + 0.5);
                        pixels[(row + x as isize) as usize] = self.sample(sx - 0.5, sy - 0.5);
                    }
                }
                tiles.insert((ti, tj), MaskTile::from_vec(self.tile_size, pixels));
            }
        }

        Ok(TiledMask {
            rect: dest_rect,
            tile_size: self.tile_size,
            default_color: self.default_color,
            tiles,
        })
    }

    pub fn rect(&self) -> Rectangle {
        self.rect
    }

    pub fn default_color(&self) -> u8 {
        self.default_color
    }

    pub fn tile_at(&self, i: i32, j: i32) -> Option<&MaskTile> {
        self.tiles.get(&(i, j))
    }

    /// The mask value at a canvas coordinate; the default color applies
    /// outside the mask rectangle.
    pub fn value_at(&self, x: i32, y: i32) -> u8 {
        if !self.rect.contains_point(x, y) {
            return self.default_color;
        }
        let ts = self.tile_size as i32;
        match self.tiles.get(&(x.div_euclid(ts), y.div_euclid(ts))) {
            Some(tile) => tile.pixel_at(x.rem_euclid(ts) as u32, y.rem_euclid(ts) as u32),
            None => self.default_color,
        }
    }

    /// Fill `out` with mask coverage for the canvas row `y` over the
    /// half open column range `x0..x1`.
    pub fn fill_row(&self, y: i32, x0: i32, x1: i32, out: &mut [u8]) {
        debug_assert_eq!(out.len(), (x1 - x0) as usize);
        out.fill(self.default_color);
        if y < self.rect.y || y > self.rect.bottom() {
            return;
        }
        let xa = x0.max(self.rect.x);
        let xb = x1.min(self.rect.x + self.rect.w);
        if xa >= xb {
            return;
        }
        let ts = self.tile_size as i32;
        let tj = y.div_euclid(ts);
        let ty = y.rem_euclid(ts) as u32;
        for ti in xa.div_euclid(ts)..=(xb - 1).div_euclid(ts) {
            let tx0 = ti * ts;
            let sa = xa.max(tx0);
            let sb = xb.min(tx0 + ts);
            if let Some(tile) = self.tiles.get(&(ti, tj)) {
                for x in sa..sb {
                    out[(x - x0) as usize] = tile.pixel_at((x - tx0) as u32, ty);
                }
            }
        }
    }

    fn sample(&self, fx: f64, fy: f64) -> u8 {
        let x0 = fx.floor();
        let y0 = fy.floor();
        let xw = fx - x0;
        let yw = fy - y0;
        let x0 = x0 as i32;
        let y0 = y0 as i32;
        let acc = self.value_at(x0, y0) as f64 * (1.0 - xw) * (1.0 - yw)
            + self.value_at(x0 + 1, y0) as f64 * xw * (1.0 - yw)
            + self.value_at(x0, y0 + 1) as f64 * (1.0 - xw) * yw
            + self.value_at(x0 + 1, y0 + 1) as f64 * xw * yw;
        (acc + 0.5).min(255.0) as u8
    }
}

fn sample_mask_plane(data: &[u8], w: usize, h: usize, fx: f64, fy: f64, default: u8) -> u8 {
    let x0 = fx.floor();
    let y0 = fy.floor();
    let xw = fx - x0;
    let yw = fy - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let fetch = |x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            default as f64
        } else {
            data[y as usize * w + x as usize] as f64
        }
    };

    let acc = fetch(x0, y0) * (1.0 - xw) * (1.0 - yw)
        + fetch(x0 + 1, y0) * xw * (1.0 - yw)
        + fetch(x0, y0 + 1) * (1.0 - xw) * yw
        + fetch(x0 + 1, y0 + 1) * xw * yw;
    (acc + 0.5).min(255.0) as u8
}
