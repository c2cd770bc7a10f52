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

//! The decoder collaborator contract.
//!
//! PSD parsing lives outside this crate. A host wraps its parser in the
//! [`Decoder`] trait: one [`Config`] callback when the file header has
//! been read, then one [`LayerRecord`] per layer in the document's
//! traversal order (bottom-most first, folder boundaries marked with
//! section sentinels). The compositor consumes the stream and never
//! touches the file format itself.

use std::collections::HashMap;

use num_enum::TryFromPrimitive;

use crate::paint::Rectangle;
use crate::CompositeResult;

/// Channel plane keys used in [`LayerRecord::channels`].
pub const CHANNEL_RED: i16 = 0;
pub const CHANNEL_GREEN: i16 = 1;
pub const CHANNEL_BLUE: i16 = 2;
pub const CHANNEL_ALPHA: i16 = -1;
pub const CHANNEL_USER_MASK: i16 = -2;

#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ColorMode {
    Bitmap = 0,
    Grayscale = 1,
    Indexed = 2,
    Rgb = 3,
    Cmyk = 4,
    Multichannel = 7,
    Duotone = 8,
    Lab = 9,
}

/// Document level information from the PSD header.
#[derive(Clone, Debug)]
pub struct Config {
    /// The canvas rectangle all layers are positioned within
    pub rect: Rectangle,
    pub color_mode: ColorMode,
    /// Bits per channel
    pub depth: u8,
}

/// Folder structure sentinels from the layer section divider setting.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionType {
    /// A plain pixel layer
    Other = 0,
    OpenFolder = 1,
    ClosedFolder = 2,
    /// Closes the most recently opened folder
    Divider = 3,
}

#[derive(Clone, Debug)]
pub struct MaskData {
    /// Non-empty mask rectangle in canvas coordinates
    pub rect: Rectangle,
    /// Value applied outside the mask rectangle, 0 or 255
    pub default_color: u8,
    pub disabled: bool,
}

/// One decoded layer record, delivered in traversal order.
#[derive(Clone, Debug, Default)]
pub struct LayerRecord {
    /// Unique id assigned by the decoder; keys the layer image map and
    /// the render cache.
    pub seq_id: i32,

    /// Raw name bytes; possibly in a legacy multi-byte encoding
    pub name: Vec<u8>,

    /// Pixel content rectangle; None for folders and empty layers
    pub rect: Option<Rectangle>,

    pub mask: Option<MaskData>,

    pub section: SectionType,

    /// Four byte PSD blend mode signature
    pub blend_key: [u8; 4],

    pub opacity: u8,

    /// Uses the underlying layer's alpha as a clipping mask
    pub clipping: bool,

    pub visible: bool,

    /// Folder attribute; false selects pass-through composition
    pub blend_clipped_elements: bool,

    /// Channel planes, row major over `rect` (`CHANNEL_USER_MASK` is
    /// row major over the mask rectangle)
    pub channels: HashMap<i16, Vec<u8>>,
}

impl LayerRecord {
    pub fn has_image(&self) -> bool {
        self.rect.is_some()
            && self.channels.contains_key(&CHANNEL_RED)
            && self.channels.contains_key(&CHANNEL_GREEN)
            && self.channels.contains_key(&CHANNEL_BLUE)
    }
}

impl Default for SectionType {
    fn default() -> Self {
        SectionType::Other
    }
}

/// Callbacks the compositor hands to the decoder.
#[derive(Default)]
pub struct DecodeOptions<'a> {
    /// Do not decode the flattened merged image section
    pub skip_merged_image: bool,

    /// Called once after the header. An error return aborts decoding.
    pub config_loaded: Option<Box<dyn FnMut(&Config) -> CompositeResult<()> + 'a>>,

    /// Called per layer with (record, index, total)
    pub layer_image_loaded: Option<Box<dyn FnMut(LayerRecord, usize, usize) + 'a>>,
}

/// A PSD decoder supplied by the host.
pub trait Decoder {
    fn decode(&mut self, opts: &mut DecodeOptions) -> CompositeResult<Config>;
}

/// Detects the character encoding of a legacy layer name. The default
/// treats names as UTF-8.
pub type EncodingDetector = fn(&[u8]) -> &'static encoding_rs::Encoding;

pub fn default_encoding_detector(_name: &[u8]) -> &'static encoding_rs::Encoding {
    encoding_rs::UTF_8
}
