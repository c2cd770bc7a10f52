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

pub mod color;
pub mod rasterop;
pub mod rectiter;
pub mod xform;

mod blendmode;
mod image;
mod rect;
mod tile;
mod tiledimage;

// Re-export types most commonly used from the outside
pub use self::image::{Image, Image8};
pub use blendmode::Blendmode;
pub use color::Pixel8;
pub use rect::{union_opt, Rectangle};
pub use tile::{ImageTile, MaskTile, Tile};
pub use tiledimage::{TiledImage, TiledMask};
pub use xform::{Aff3, GammaTable, AFF3_IDENTITY};
