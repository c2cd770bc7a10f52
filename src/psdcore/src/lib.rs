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

//! Composites a decoded Photoshop document into a flat raster image.
//!
//! The PSD binary format itself is not parsed here; a host supplies a
//! [`codec::Decoder`] implementation that streams decoded layer records.
//! This crate turns those records into an immutable tiled layer tree
//! ([`tree::Tree`]) which can then be rendered, in whole or in part, into
//! an RGBA destination image. Only RGB color mode documents are supported.

use std::{fmt, io};

pub mod codec;
pub mod paint;
pub mod tree;

mod parallel;

#[derive(Debug)]
pub enum CompositeError {
    IoError(io::Error),
    DecoderError(Box<dyn std::error::Error + Send + Sync>),
    UnsupportedColorMode,
    TileBuildError(String),
    Cancelled,
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeError::IoError(e) => e.fmt(f),
            CompositeError::DecoderError(e) => e.fmt(f),
            CompositeError::UnsupportedColorMode => write!(f, "Unsupported color mode"),
            CompositeError::TileBuildError(msg) => write!(f, "tile build failed: {}", msg),
            CompositeError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for CompositeError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        match self {
            CompositeError::IoError(e) => Some(e),
            CompositeError::DecoderError(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for CompositeError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

pub type CompositeResult<T> = Result<T, CompositeError>;

// Re-export the types most commonly used from the outside
pub use paint::{Aff3, Blendmode, Image8, Pixel8, Rectangle, TiledImage, TiledMask};
pub use tree::{
    CancelToken, Layer, LayerImage, Options, RenderOptions, Tree, DEFAULT_TILE_SIZE, SEQ_ID_ROOT,
};
