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

use crate::paint::{Blendmode, TiledImage, TiledMask};

/// Reserved sequence id of the synthetic root folder. The decoder never
/// produces it.
pub const SEQ_ID_ROOT: i32 = -1;

/// Index of a layer in the tree's arena. Parent and clipping relations
/// are arena indices rather than owning references; the arena owns
/// every layer.
pub type LayerIndex = usize;

/// One node of the layer tree.
///
/// Hosts may flip presentation fields (visibility, opacity, blend mode)
/// on a loaded tree, but must then invalidate the affected caches with
/// `Tree::set_dirty`.
#[derive(Clone, Debug)]
pub struct Layer {
    pub seq_id: i32,

    pub name: String,

    pub folder: bool,
    pub folder_open: bool,

    pub visible: bool,
    pub blendmode: Blendmode,
    pub opacity: u8,
    /// Uses the underlying layer's alpha as a clipping mask
    pub clipping: bool,

    pub blend_clipped_elements: bool,

    pub mask_enabled: bool,
    pub mask_default_color: u8,

    pub parent: Option<LayerIndex>,
    /// Bottom-up paint order
    pub children: Vec<LayerIndex>,

    /// The base of the clip stack this layer participates in
    pub clipped_by: Option<LayerIndex>,
    /// For a clip stack base, the layers clipped against it, bottom-up
    pub clip: Vec<LayerIndex>,
}

impl Layer {
    pub(crate) fn new_root() -> Layer {
        Layer {
            seq_id: SEQ_ID_ROOT,
            name: String::new(),
            folder: true,
            folder_open: true,
            visible: true,
            blendmode: Blendmode::Normal,
            opacity: 255,
            clipping: false,
            blend_clipped_elements: true,
            mask_enabled: false,
            mask_default_color: 255,
            parent: None,
            children: Vec::new(),
            clipped_by: None,
            clip: Vec::new(),
        }
    }
}

/// A layer's rasterized content: the RGBA canvas and the 8 bit mask.
/// Folders and empty layers have neither; unmasked layers have no mask.
/// Entries are immutable once inserted and shared between tree clones.
#[derive(Clone, Default)]
pub struct LayerImage {
    pub canvas: Option<TiledImage>,
    pub mask: Option<TiledMask>,
}
