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

//! Drives the decoder and fans layer pixel data out to a worker pool
//! that builds the tiled images and masks.

use std::collections::HashMap;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::debug;

use crate::codec::{
    Config, DecodeOptions, Decoder, LayerRecord, MaskData, CHANNEL_ALPHA, CHANNEL_BLUE,
    CHANNEL_GREEN, CHANNEL_RED, CHANNEL_USER_MASK,
};
use crate::paint::xform::transform_rect;
use crate::paint::{Aff3, GammaTable, Rectangle, TiledImage, TiledMask};
use crate::parallel::{CancelToken, ParallelContext};
use crate::{CompositeError, CompositeResult};

use super::layer::LayerImage;

pub(crate) struct LoadedCanvas {
    pub images: HashMap<i32, LayerImage>,
    pub canvas_rect: Rectangle,
    /// Records in traversal order, channel planes taken out
    pub records: Vec<LayerRecord>,
}

struct WorkItem {
    seq_id: i32,
    rect: Option<Rectangle>,
    mask: Option<MaskData>,
    channels: HashMap<i16, Vec<u8>>,
}

/// Decode the document and build the layer image map.
///
/// The decoder callback hands each layer over a rendezvous channel, so
/// decoding proceeds at the pace the workers can tile (the decoder
/// blocks until a worker accepts the layer). Worker count is the
/// machine's available parallelism.
pub(crate) fn create_canvas<D: Decoder + ?Sized>(
    decoder: &mut D,
    token: Option<&CancelToken>,
    tile_size: u32,
    m: &Aff3,
    gamma: Option<&GammaTable>,
) -> CompositeResult<LoadedCanvas> {
    let n = thread::available_parallelism().map_or(1, |n| n.get());

    let (tx, rx) = bounded::<WorkItem>(0);
    let pc = ParallelContext::new(token, HashMap::new());
    let mut records: Vec<LayerRecord> = Vec::new();

    let mut decode_result: Option<CompositeResult<Config>> = None;
    thread::scope(|s| {
        for _ in 0..n {
            let rx: Receiver<WorkItem> = rx.clone();
            let pc = &pc;
            s.spawn(move || worker(rx, pc, tile_size, m, gamma));
        }
        drop(rx);

        let mut opts = DecodeOptions {
            skip_merged_image: true,
            config_loaded: Some(Box::new(|cfg: &Config| {
                if cfg.color_mode != crate::codec::ColorMode::Rgb {
                    return Err(CompositeError::UnsupportedColorMode);
                }
                Ok(())
            })),
            layer_image_loaded: Some(Box::new(|mut rec: LayerRecord, index, total| {
                debug!(index, total, seq_id = rec.seq_id, "layer decoded");
                let channels = std::mem::take(&mut rec.channels);
                if !pc.aborted() {
                    // A send error means every worker has already bailed
                    // out; the cause is in the parallel context.
                    let _ = tx.send(WorkItem {
                        seq_id: rec.seq_id,
                        rect: rec.rect,
                        mask: rec.mask.clone(),
                        channels,
                    });
                }
                records.push(rec);
            })),
        };
        decode_result = Some(decoder.decode(&mut opts));
        drop(opts);
        drop(tx);
        // scope joins the workers
    });

    let config = decode_result.unwrap()?;
    let images = pc.finish()?;

    // Unconditional, identity included: the conservative expansion in
    // transform_rect is part of the canvas geometry contract.
    let canvas_rect = transform_rect(&config.rect, m);

    Ok(LoadedCanvas {
        images,
        canvas_rect,
        records,
    })
}

fn worker(
    rx: Receiver<WorkItem>,
    pc: &ParallelContext<'_, HashMap<i32, LayerImage>>,
    tile_size: u32,
    m: &Aff3,
    gamma: Option<&GammaTable>,
) {
    for item in rx {
        if pc.aborted() {
            return;
        }
        match build_layer_image(&item, pc.token(), tile_size, m, gamma) {
            Ok(li) => {
                pc.lock_results().insert(item.seq_id, li);
            }
            Err(err) => {
                pc.record(err);
                return;
            }
        }
    }
}

fn build_layer_image(
    item: &WorkItem,
    token: Option<&CancelToken>,
    tile_size: u32,
    m: &Aff3,
    gamma: Option<&GammaTable>,
) -> CompositeResult<LayerImage> {
    let mut li = LayerImage::default();

    if let Some(rect) = &item.rect {
        if let (Some(r), Some(g), Some(b)) = (
            item.channels.get(&CHANNEL_RED),
            item.channels.get(&CHANNEL_GREEN),
            item.channels.get(&CHANNEL_BLUE),
        ) {
            let a = item.channels.get(&CHANNEL_ALPHA).map(|v| v.as_slice());
            li.canvas = Some(TiledImage::new_scaled(
                token, tile_size, rect, r, g, b, a, m, gamma,
            )?);
        }
    }

    if let Some(mask) = &item.mask {
        if let Some(data) = item.channels.get(&CHANNEL_USER_MASK) {
            li.mask = Some(TiledMask::new_scaled(
                token,
                tile_size,
                &mask.rect,
                data,
                mask.default_color,
                m,
            )?);
        }
    }

    Ok(li)
}
