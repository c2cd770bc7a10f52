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

use std::fmt;
use std::sync::Arc;

use super::color::Pixel8;
use super::rectiter::RowIter;
use super::Rectangle;

/// A square, immutable pixel buffer.
///
/// Tiles are reference counted: cloning a tile (or the tiled image
/// holding it) shares the pixel storage. The tile size is chosen per
/// layer tree, so it is carried by the tile rather than being a
/// compile time constant.
pub struct Tile<T> {
    size: u32,
    pixels: Arc<Vec<T>>,
}

/// An RGBA layer content tile.
pub type ImageTile = Tile<Pixel8>;
/// A single channel layer mask tile.
pub type MaskTile = Tile<u8>;

impl<T: Copy + Default> Tile<T> {
    pub fn new_filled(size: u32, fill: T) -> Tile<T> {
        Tile {
            size,
            pixels: Arc::new(vec![fill; (size * size) as usize]),
        }
    }

    pub fn from_vec(size: u32, pixels: Vec<T>) -> Tile<T> {
        assert_eq!(pixels.len(), (size * size) as usize, "Wrong tile data length");
        Tile {
            size,
            pixels: Arc::new(pixels),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn pixel_at(&self, x: u32, y: u32) -> T {
        debug_assert!(x < self.size);
        debug_assert!(y < self.size);
        self.pixels[(y * self.size + x) as usize]
    }

    /// Iterate rows of a sub-rectangle given in tile-local coordinates.
    pub fn rect_iter(&self, r: &Rectangle) -> RowIter<T> {
        debug_assert!(r.x >= 0 && r.y >= 0);
        debug_assert!(r.right() < self.size as i32 && r.bottom() < self.size as i32);
        RowIter::from_rectangle(&self.pixels, self.size as usize, r)
    }

    /// Do a shallow equality comparison between these two tiles
    pub fn ptr_eq(&self, other: &Tile<T>) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    #[cfg(test)]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.pixels)
    }
}

impl<T> Clone for Tile<T> {
    fn clone(&self) -> Self {
        Tile {
            size: self.size,
            pixels: self.pixels.clone(),
        }
    }
}

impl<T> fmt::Debug for Tile<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tile(size={}, refs={})",
            self.size,
            Arc::strong_count(&self.pixels)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharing() {
        let tile = MaskTile::new_filled(16, 255);
        let tile2 = tile.clone();
        assert_eq!(tile.refcount(), 2);
        assert!(tile.ptr_eq(&tile2));
    }

    #[test]
    fn test_pixel_at() {
        let mut data = vec![[0u8; 4]; 16];
        data[1 * 4 + 2] = [9, 9, 9, 9];
        let tile = ImageTile::from_vec(4, data);
        assert_eq!(tile.pixel_at(2, 1), [9, 9, 9, 9]);
        assert_eq!(tile.pixel_at(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_rect_iter() {
        let mut data = vec![0u8; 16];
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as u8;
        }
        let tile = MaskTile::from_vec(4, data);
        let rows: Vec<&[u8]> = tile.rect_iter(&Rectangle::new(1, 2, 2, 2)).collect();
        assert_eq!(rows, vec![&[9u8, 10][..], &[13u8, 14][..]]);
    }
}
