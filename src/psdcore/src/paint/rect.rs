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

/// A non-empty axis aligned rectangle in canvas coordinates.
///
/// A document knows several kinds of rectangles: the canvas, layer
/// content, mask extents and render regions, all in the same canvas
/// coordinate space and all possibly starting at negative coordinates
/// after a transform. Emptiness is represented as `Option<Rectangle>`
/// at the use sites; a layer without pixel data simply has no
/// rectangle.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Rectangle {
        assert!(w > 0 && h > 0);
        Rectangle { x, y, w, h }
    }

    fn from_edges(x0: i32, y0: i32, x1: i32, y1: i32) -> Option<Rectangle> {
        if x0 < x1 && y0 < y1 {
            Some(Rectangle {
                x: x0,
                y: y0,
                w: x1 - x0,
                h: y1 - y0,
            })
        } else {
            None
        }
    }

    /// Last column still inside the rectangle.
    pub fn right(&self) -> i32 {
        self.x + self.w - 1
    }

    /// Last row still inside the rectangle.
    pub fn bottom(&self) -> i32 {
        self.y + self.h - 1
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x <= self.right() && y <= self.bottom()
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        self.contains_point(other.x, other.y) && self.contains_point(other.right(), other.bottom())
    }

    pub fn intersected(&self, other: &Rectangle) -> Option<Rectangle> {
        Rectangle::from_edges(
            self.x.max(other.x),
            self.y.max(other.y),
            (self.x + self.w).min(other.x + other.w),
            (self.y + self.h).min(other.y + other.h),
        )
    }

    pub fn union(&self, other: &Rectangle) -> Rectangle {
        Rectangle::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            (self.x + self.w).max(other.x + other.w),
            (self.y + self.h).max(other.y + other.h),
        )
        .unwrap()
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle {
            x: self.x + dx,
            y: self.y + dy,
            w: self.w,
            h: self.h,
        }
    }
}

/// Union of two optional rectangles; None acts as the empty rectangle.
pub fn union_opt(a: Option<Rectangle>, b: Option<Rectangle>) -> Option<Rectangle> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
