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

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

/// Layer blend modes.
///
/// `PassThrough` is valid only on folders: the folder's children are
/// composited straight into the parent buffer without isolation. It is
/// a distinct variant rather than a flag so the renderer match stays
/// exhaustive.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Blendmode {
    PassThrough = 0,
    Normal,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    LinearLight,
    VividLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl Blendmode {
    pub fn is_pass_through(self) -> bool {
        self == Blendmode::PassThrough
    }

    /// The four byte signature used in the PSD layer record.
    pub fn psd_key(self) -> &'static [u8; 4] {
        use Blendmode::*;
        match self {
            PassThrough => b"pass",
            Normal => b"norm",
            Darken => b"dark",
            Multiply => b"mul ",
            ColorBurn => b"idiv",
            LinearBurn => b"lbrn",
            DarkerColor => b"dkCl",
            Lighten => b"lite",
            Screen => b"scrn",
            ColorDodge => b"div ",
            LinearDodge => b"lddg",
            LighterColor => b"lgCl",
            Overlay => b"over",
            SoftLight => b"sLit",
            HardLight => b"hLit",
            LinearLight => b"lLit",
            VividLight => b"vLit",
            PinLight => b"pLit",
            HardMix => b"hMix",
            Difference => b"diff",
            Exclusion => b"smud",
            Subtract => b"fsub",
            Divide => b"fdiv",
            Hue => b"hue ",
            Saturation => b"sat ",
            Color => b"colr",
            Luminosity => b"lum ",
        }
    }

    pub fn from_psd_key(key: &[u8; 4]) -> Option<Self> {
        use Blendmode::*;
        Some(match key {
            b"pass" => PassThrough,
            b"norm" => Normal,
            b"dark" => Darken,
            b"mul " => Multiply,
            b"idiv" => ColorBurn,
            b"lbrn" => LinearBurn,
            b"dkCl" => DarkerColor,
            b"lite" => Lighten,
            b"scrn" => Screen,
            b"div " => ColorDodge,
            b"lddg" => LinearDodge,
            b"lgCl" => LighterColor,
            b"over" => Overlay,
            b"sLit" => SoftLight,
            b"hLit" => HardLight,
            b"lLit" => LinearLight,
            b"vLit" => VividLight,
            b"pLit" => PinLight,
            b"hMix" => HardMix,
            b"diff" => Difference,
            b"smud" => Exclusion,
            b"fsub" => Subtract,
            b"fdiv" => Divide,
            b"hue " => Hue,
            b"sat " => Saturation,
            b"colr" => Color,
            b"lum " => Luminosity,
            _ => {
                return None;
            }
        })
    }
}

impl Default for Blendmode {
    fn default() -> Self {
        Blendmode::Normal
    }
}
