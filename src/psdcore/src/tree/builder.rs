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

use std::collections::HashMap;

use tracing::warn;

use crate::codec::{EncodingDetector, LayerRecord, SectionType};
use crate::paint::{union_opt, Blendmode, Rectangle};

use super::layer::{Layer, LayerImage, LayerIndex};

/// The built tree structure: the node arena (root at index 0), the
/// sequence id lookup and the bounding union of visible layer content.
pub(crate) struct BuiltTree {
    pub arena: Vec<Layer>,
    pub by_seq: HashMap<i32, LayerIndex>,
    pub content_rect: Option<Rectangle>,
}

/// Fold the decoder's flat record list into a layer tree.
///
/// Folder boundaries arrive as section sentinels: an open/closed folder
/// record starts a folder, a divider record closes the innermost one.
/// Records are in bottom-up paint order, so each folder's child vector
/// ends up bottom-up as well.
pub(crate) fn build_tree(
    records: &[LayerRecord],
    images: &HashMap<i32, LayerImage>,
    detector: EncodingDetector,
) -> BuiltTree {
    let mut arena = vec![Layer::new_root()];
    let mut by_seq = HashMap::new();
    by_seq.insert(arena[0].seq_id, 0);
    let mut content_rect = None;

    let mut stack: Vec<LayerIndex> = vec![0];
    for rec in records {
        if rec.section == SectionType::Divider {
            if stack.len() > 1 {
                stack.pop();
            } else {
                warn!("folder divider without an open folder");
            }
            continue;
        }

        let parent = *stack.last().unwrap();
        let index = arena.len();
        let layer = build_layer(rec, parent, detector);

        if by_seq.insert(layer.seq_id, index).is_some() {
            warn!(seq_id = layer.seq_id, "duplicate layer sequence id");
        }
        if layer.visible && !layer.folder {
            if let Some(li) = images.get(&layer.seq_id) {
                if let Some(canvas) = &li.canvas {
                    content_rect = union_opt(content_rect, Some(canvas.rect()));
                }
            }
        }

        let folder = layer.folder;
        arena.push(layer);
        arena[parent].children.push(index);
        if folder {
            stack.push(index);
        }
    }

    register_clipping_group(&mut arena, 0);

    BuiltTree {
        arena,
        by_seq,
        content_rect,
    }
}

fn build_layer(rec: &LayerRecord, parent: LayerIndex, detector: EncodingDetector) -> Layer {
    let folder = matches!(
        rec.section,
        SectionType::OpenFolder | SectionType::ClosedFolder
    );

    let mut blendmode = Blendmode::from_psd_key(&rec.blend_key).unwrap_or_else(|| {
        warn!(
            key = %String::from_utf8_lossy(&rec.blend_key),
            "unknown blend mode signature, falling back to Normal"
        );
        Blendmode::Normal
    });
    // A folder that does not blend its clipped elements composites as
    // pass-through even when its record still says Normal.
    if folder && blendmode == Blendmode::Normal && !rec.blend_clipped_elements {
        blendmode = Blendmode::PassThrough;
    }
    if !folder && blendmode == Blendmode::PassThrough {
        warn!(seq_id = rec.seq_id, "pass-through on a non-folder layer");
        blendmode = Blendmode::Normal;
    }

    Layer {
        seq_id: rec.seq_id,
        name: decode_name(&rec.name, detector),
        folder,
        folder_open: rec.section == SectionType::OpenFolder,
        visible: rec.visible,
        blendmode,
        opacity: rec.opacity,
        clipping: rec.clipping,
        blend_clipped_elements: rec.blend_clipped_elements,
        mask_enabled: rec.mask.as_ref().map_or(false, |m| !m.disabled),
        mask_default_color: rec.mask.as_ref().map_or(255, |m| m.default_color),
        parent: Some(parent),
        children: Vec::new(),
        clipped_by: None,
        clip: Vec::new(),
    }
}

fn decode_name(raw: &[u8], detector: EncodingDetector) -> String {
    let (decoded, _, _) = detector(raw).decode(raw);
    decoded.into_owned()
}

/// Wire up clipping groups: walking each sibling list in bottom-up
/// paint order, a run of clipping layers attaches to the nearest
/// non-clipping sibling below it. A run with no base below is
/// discarded, which matches Photoshop ignoring the flag there.
fn register_clipping_group(arena: &mut [Layer], parent: LayerIndex) {
    let children = arena[parent].children.clone();
    let mut base: Option<LayerIndex> = None;
    for &child in &children {
        if arena[child].clipping {
            if let Some(b) = base {
                arena[child].clipped_by = Some(b);
                arena[b].clip.push(child);
            }
        } else {
            base = Some(child);
        }
        if arena[child].folder {
            register_clipping_group(arena, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::default_encoding_detector;

    fn rec(seq_id: i32, section: SectionType) -> LayerRecord {
        LayerRecord {
            seq_id,
            name: format!("layer {}", seq_id).into_bytes(),
            section,
            blend_key: *b"norm",
            opacity: 255,
            visible: true,
            blend_clipped_elements: true,
            ..LayerRecord::default()
        }
    }

    #[test]
    fn test_folder_nesting() {
        // bottom-up: layer 1, folder 2 [ layer 3, folder 4 [ layer 5 ] ], layer 6
        let records = vec![
            rec(1, SectionType::Other),
            rec(2, SectionType::OpenFolder),
            rec(3, SectionType::Other),
            rec(4, SectionType::ClosedFolder),
            rec(5, SectionType::Other),
            rec(0, SectionType::Divider),
            rec(0, SectionType::Divider),
            rec(6, SectionType::Other),
        ];
        let built = build_tree(&records, &HashMap::new(), default_encoding_detector);
        let arena = &built.arena;

        let root = &arena[0];
        assert_eq!(root.children.len(), 3);

        let folder2 = &arena[built.by_seq[&2]];
        assert!(folder2.folder);
        assert!(folder2.folder_open);
        assert_eq!(folder2.children.len(), 2);
        assert_eq!(folder2.parent, Some(0));

        let folder4 = &arena[built.by_seq[&4]];
        assert!(folder4.folder);
        assert!(!folder4.folder_open);
        assert_eq!(folder4.children.len(), 1);
        assert_eq!(folder4.parent, Some(built.by_seq[&2]));

        let l5 = &arena[built.by_seq[&5]];
        assert_eq!(l5.parent, Some(built.by_seq[&4]));
        assert_eq!(l5.name, "layer 5");

        // every child points back at its parent
        for (i, layer) in arena.iter().enumerate().skip(1) {
            let p = layer.parent.expect("non-root layer must have a parent");
            assert!(arena[p].children.contains(&i));
        }
    }

    #[test]
    fn test_clipping_group_registration() {
        let mut base = rec(1, SectionType::Other);
        base.clipping = false;
        let mut c1 = rec(2, SectionType::Other);
        c1.clipping = true;
        let mut c2 = rec(3, SectionType::Other);
        c2.clipping = true;
        let top = rec(4, SectionType::Other);

        let records = vec![base, c1, c2, top];
        let built = build_tree(&records, &HashMap::new(), default_encoding_detector);
        let arena = &built.arena;

        let bi = built.by_seq[&1];
        assert_eq!(arena[bi].clip, vec![built.by_seq[&2], built.by_seq[&3]]);
        assert_eq!(arena[built.by_seq[&2]].clipped_by, Some(bi));
        assert_eq!(arena[built.by_seq[&3]].clipped_by, Some(bi));
        assert_eq!(arena[built.by_seq[&4]].clipped_by, None);
        assert!(arena[built.by_seq[&4]].clip.is_empty());

        // every clipped layer names a base whose clip list contains it
        for (i, layer) in arena.iter().enumerate() {
            if let Some(b) = layer.clipped_by {
                assert!(arena[b].clip.contains(&i));
            }
        }
    }

    #[test]
    fn test_baseless_clip_run_is_discarded() {
        let mut c = rec(1, SectionType::Other);
        c.clipping = true;
        let top = rec(2, SectionType::Other);
        let built = build_tree(&[c, top], &HashMap::new(), default_encoding_detector);

        assert_eq!(built.arena[built.by_seq[&1]].clipped_by, None);
        assert!(built.arena[built.by_seq[&2]].clip.is_empty());
    }

    #[test]
    fn test_pass_through_mapping() {
        let mut folder = rec(1, SectionType::OpenFolder);
        folder.blend_clipped_elements = false;
        let mut explicit = rec(2, SectionType::OpenFolder);
        explicit.blend_key = *b"pass";
        let records = vec![
            folder,
            rec(0, SectionType::Divider),
            explicit,
            rec(0, SectionType::Divider),
        ];
        let built = build_tree(&records, &HashMap::new(), default_encoding_detector);
        assert_eq!(
            built.arena[built.by_seq[&1]].blendmode,
            Blendmode::PassThrough
        );
        assert_eq!(
            built.arena[built.by_seq[&2]].blendmode,
            Blendmode::PassThrough
        );
    }

    #[test]
    fn test_name_decoding() {
        fn shift_jis_detector(_: &[u8]) -> &'static encoding_rs::Encoding {
            encoding_rs::SHIFT_JIS
        }
        // "レイヤー" in Shift-JIS
        let mut r = rec(1, SectionType::Other);
        r.name = vec![0x83, 0x8c, 0x83, 0x43, 0x83, 0x84, 0x81, 0x5b];
        let built = build_tree(&[r], &HashMap::new(), shift_jis_detector);
        assert_eq!(built.arena[built.by_seq[&1]].name, "レイヤー");
    }
}
