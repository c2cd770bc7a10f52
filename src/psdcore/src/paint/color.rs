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

/// A straight (non-premultiplied) 8 bit RGBA pixel.
pub type Pixel8 = [u8; 4];

pub const RED_CHANNEL: usize = 0;
pub const GREEN_CHANNEL: usize = 1;
pub const BLUE_CHANNEL: usize = 2;
pub const ALPHA_CHANNEL: usize = 3;

pub const ZERO_PIXEL8: Pixel8 = [0; 4];
pub const WHITE_PIXEL8: Pixel8 = [255; 4];

/// Multiply two 0..255 channel values, rounding to nearest.
pub fn u8_mul(a: u32, b: u32) -> u32 {
    let c = a * b + 0x80;
    ((c >> 8) + c) >> 8
}

const LUM_R: i32 = (0.3 * 255.0) as i32;
const LUM_G: i32 = (0.59 * 255.0) as i32;
const LUM_B: i32 = (0.11 * 255.0) as i32;

/// Photoshop's luma weighting of an RGB triple, in the 0..255 scale.
pub fn lum8(c: [i32; 3]) -> i32 {
    (LUM_R * c[RED_CHANNEL] + LUM_G * c[GREEN_CHANNEL] + LUM_B * c[BLUE_CHANNEL]) / 255
}
