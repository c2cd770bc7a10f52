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

use super::Rectangle;

/// A row major 2x3 affine matrix:
/// `x' = m[0]*x + m[1]*y + m[2]`, `y' = m[3]*x + m[4]*y + m[5]`.
pub type Aff3 = [f64; 6];

pub const AFF3_IDENTITY: Aff3 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

pub fn is_identity(m: &Aff3) -> bool {
    *m == AFF3_IDENTITY
}

pub fn apply(m: &Aff3, x: f64, y: f64) -> (f64, f64) {
    (x * m[0] + y * m[1] + m[2], x * m[3] + y * m[4] + m[5])
}

/// Invert an affine matrix. Returns None for a singular matrix.
pub fn invert(m: &Aff3) -> Option<Aff3> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        m[4] * inv_det,
        -m[1] * inv_det,
        (m[1] * m[5] - m[4] * m[2]) * inv_det,
        -m[3] * inv_det,
        m[0] * inv_det,
        (m[3] * m[2] - m[0] * m[5]) * inv_det,
    ])
}

/// Map a rectangle through an affine matrix, returning the integer
/// bounding rectangle of the transformed corners.
///
/// The max corner of every transformed point is expanded by one before
/// the final ceil, so the result over-covers by up to two pixels on the
/// max side. Tile coverage is sized with this function and depends on
/// the over-coverage being at least one pixel.
pub fn transform_rect(r: &Rectangle, m: &Aff3) -> Rectangle {
    let pts = [
        (r.x as f64, r.y as f64),
        ((r.x + r.w) as f64, r.y as f64),
        ((r.x + r.w) as f64, (r.y + r.h) as f64),
        (r.x as f64, (r.y + r.h) as f64),
    ];
    let mut x_min = 0.0f64;
    let mut y_min = 0.0f64;
    let mut x_max = 0.0f64;
    let mut y_max = 0.0f64;
    for (i, &(sx, sy)) in pts.iter().enumerate() {
        let (mut dx, mut dy) = apply(m, sx, sy);
        if i == 0 {
            x_min = dx;
            y_min = dy;
            x_max = dx + 1.0;
            y_max = dy + 1.0;
            continue;
        }
        if x_min > dx {
            x_min = dx;
        }
        if y_min > dy {
            y_min = dy;
        }
        dx += 1.0;
        dy += 1.0;
        if x_max < dx {
            x_max = dx;
        }
        if y_max < dy {
            y_max = dy;
        }
    }
    let x = x_min.floor() as i32;
    let y = y_min.floor() as i32;
    Rectangle {
        x,
        y,
        w: x_max.ceil() as i32 - x,
        h: y_max.ceil() as i32 - y,
    }
}

/// Lookup table for resampling in a gamma corrected space.
///
/// Channel values are mapped forward to linear before interpolation and
/// back through the inverse after.
pub struct GammaTable {
    forward: [f64; 256],
    inv_gamma: f64,
}

impl GammaTable {
    pub fn new(gamma: f64) -> GammaTable {
        let mut forward = [0.0; 256];
        for (i, v) in forward.iter_mut().enumerate() {
            *v = (i as f64 / 255.0).powf(gamma);
        }
        GammaTable {
            forward,
            inv_gamma: 1.0 / gamma,
        }
    }

    pub fn to_linear(&self, v: u8) -> f64 {
        self.forward[v as usize]
    }

    pub fn from_linear(&self, v: f64) -> u8 {
        (v.clamp(0.0, 1.0).powf(self.inv_gamma) * 255.0 + 0.5) as u8
    }
}
