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

use super::color::{Pixel8, ALPHA_CHANNEL};
use super::rectiter::{RowIter, RowIterMut};
use super::Rectangle;

/// A flat image buffer
#[derive(Clone, Default)]
pub struct Image<T>
where
    T: Clone + Default + Eq,
{
    pub pixels: Vec<T>,
    pub width: usize,
    pub height: usize,
}

pub type Image8 = Image<Pixel8>;

impl<T> Image<T>
where
    T: Clone + Default + Eq,
{
    pub fn new(width: usize, height: usize) -> Image<T> {
        Image {
            pixels: vec![T::default(); width * height],
            width,
            height,
        }
    }

    pub fn is_null(&self) -> bool {
        assert!(self.pixels.len() == self.width * self.height);
        self.pixels.is_empty()
    }

    /// Iterate rows of a rectangle given relative to the image origin.
    pub fn rect_iter(&self, rect: &Rectangle) -> RowIter<T> {
        RowIter::from_rectangle(&self.pixels, self.width, rect)
    }

    pub fn rect_iter_mut(&mut self, rect: &Rectangle) -> RowIterMut<T> {
        RowIterMut::from_rectangle(&mut self.pixels, self.width, rect)
    }

    /// Reset a rectangle back to the default (transparent) value.
    pub fn clear_rect(&mut self, rect: &Rectangle) {
        for row in self.rect_iter_mut(rect) {
            row.fill(T::default());
        }
    }
}

impl Image8 {
    /// Force the alpha channel to fully opaque in the given rectangle.
    /// Used when the render target is declared opaque.
    pub fn remove_alpha(&mut self, rect: &Rectangle) {
        for row in self.rect_iter_mut(rect) {
            for px in row {
                px[ALPHA_CHANNEL] = 255;
            }
        }
    }
}
