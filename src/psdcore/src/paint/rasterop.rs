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

//! Per pixel blend kernels.
//!
//! All operations work on straight (non-premultiplied) 8 bit RGBA rows.
//! Compositing is Porter-Duff source-over with the mode's blend function
//! substituted for the source color where the backdrop has coverage:
//!
//! ```text
//! sa' = sa * opacity * mask
//! oa  = sa' + da - sa'*da
//! oc  = (sa'*(1-da)*sc + sa'*da*B(dc,sc) + (1-sa')*da*dc) / oa
//! ```

use super::color::*;
use super::Blendmode;
#[cfg(debug_assertions)]
use tracing::warn;

/// Blend a source row into a destination row.
pub fn pixel_blend(base: &mut [Pixel8], over: &[Pixel8], opacity: u8, mode: Blendmode) {
    let o = opacity as u32;
    match kernel(mode) {
        Kernel::Separable(op) => {
            for (dp, sp) in base.iter_mut().zip(over.iter()) {
                let sa = u8_mul(sp[ALPHA_CHANNEL] as u32, o);
                composite_pixel(dp, sp, sa, op);
            }
        }
        Kernel::NonSeparable(op) => {
            for (dp, sp) in base.iter_mut().zip(over.iter()) {
                let sa = u8_mul(sp[ALPHA_CHANNEL] as u32, o);
                composite_pixel_nonseparable(dp, sp, sa, op);
            }
        }
    }
}

/// Blend a source row into a destination row through an 8 bit coverage
/// mask. The mask multiplies with the uniform opacity, so a layer mask
/// and the layer opacity apply in a single pass.
pub fn mask_blend(base: &mut [Pixel8], over: &[Pixel8], mask: &[u8], opacity: u8, mode: Blendmode) {
    debug_assert!(base.len() == mask.len());
    let o = opacity as u32;
    match kernel(mode) {
        Kernel::Separable(op) => {
            for ((dp, sp), &m) in base.iter_mut().zip(over.iter()).zip(mask.iter()) {
                let sa = u8_mul(u8_mul(sp[ALPHA_CHANNEL] as u32, m as u32), o);
                composite_pixel(dp, sp, sa, op);
            }
        }
        Kernel::NonSeparable(op) => {
            for ((dp, sp), &m) in base.iter_mut().zip(over.iter()).zip(mask.iter()) {
                let sa = u8_mul(u8_mul(sp[ALPHA_CHANNEL] as u32, m as u32), o);
                composite_pixel_nonseparable(dp, sp, sa, op);
            }
        }
    }
}

enum Kernel {
    /// Each channel blends independently
    Separable(fn(u32, u32) -> u32),
    /// The channels interact (luma based modes)
    NonSeparable(fn(Rgb32, Rgb32) -> Rgb32),
}

fn kernel(mode: Blendmode) -> Kernel {
    use Kernel::*;
    match mode {
        Blendmode::PassThrough => {
            // Handled by the renderer before the kernels; degrade to Normal
            #[cfg(debug_assertions)]
            warn!("pass-through mode reached the blend kernels");
            Separable(comp_op_normal)
        }
        Blendmode::Normal => Separable(comp_op_normal),
        Blendmode::Darken => Separable(comp_op_darken),
        Blendmode::Multiply => Separable(comp_op_multiply),
        Blendmode::ColorBurn => Separable(comp_op_color_burn),
        Blendmode::LinearBurn => Separable(comp_op_linear_burn),
        Blendmode::DarkerColor => NonSeparable(comp_op_darker_color),
        Blendmode::Lighten => Separable(comp_op_lighten),
        Blendmode::Screen => Separable(comp_op_screen),
        Blendmode::ColorDodge => Separable(comp_op_color_dodge),
        // Photoshop computes Linear Dodge and Add identically in 8 bit RGB
        Blendmode::LinearDodge => Separable(comp_op_add),
        Blendmode::LighterColor => NonSeparable(comp_op_lighter_color),
        Blendmode::Overlay => Separable(comp_op_overlay),
        Blendmode::SoftLight => Separable(comp_op_soft_light),
        Blendmode::HardLight => Separable(comp_op_hard_light),
        Blendmode::LinearLight => Separable(comp_op_linear_light),
        Blendmode::VividLight => Separable(comp_op_vivid_light),
        Blendmode::PinLight => Separable(comp_op_pin_light),
        Blendmode::HardMix => Separable(comp_op_hard_mix),
        Blendmode::Difference => Separable(comp_op_difference),
        Blendmode::Exclusion => Separable(comp_op_exclusion),
        Blendmode::Subtract => Separable(comp_op_subtract),
        Blendmode::Divide => Separable(comp_op_divide),
        Blendmode::Hue => NonSeparable(comp_op_hue),
        Blendmode::Saturation => NonSeparable(comp_op_saturation),
        Blendmode::Color => NonSeparable(comp_op_color),
        Blendmode::Luminosity => NonSeparable(comp_op_luminosity),
    }
}

fn composite_pixel(dp: &mut Pixel8, sp: &Pixel8, sa: u32, op: fn(u32, u32) -> u32) {
    if sa == 0 {
        return;
    }
    let da = dp[ALPHA_CHANNEL] as u32;
    let oa = sa + da - u8_mul(sa, da);
    let w_src = sa * (255 - da);
    let w_both = sa * da;
    let w_dst = (255 - sa) * da;
    // the three weights sum to exactly 255*oa
    let div = 255 * oa;
    for c in RED_CHANNEL..=BLUE_CHANNEL {
        let dc = dp[c] as u32;
        let sc = sp[c] as u32;
        let b = op(dc, sc);
        dp[c] = ((w_src * sc + w_both * b + w_dst * dc + div / 2) / div) as u8;
    }
    dp[ALPHA_CHANNEL] = oa as u8;
}

fn composite_pixel_nonseparable(dp: &mut Pixel8, sp: &Pixel8, sa: u32, op: fn(Rgb32, Rgb32) -> Rgb32) {
    if sa == 0 {
        return;
    }
    let dc3 = [dp[0] as i32, dp[1] as i32, dp[2] as i32];
    let sc3 = [sp[0] as i32, sp[1] as i32, sp[2] as i32];
    let b3 = op(dc3, sc3);

    let da = dp[ALPHA_CHANNEL] as u32;
    let oa = sa + da - u8_mul(sa, da);
    let w_src = sa * (255 - da);
    let w_both = sa * da;
    let w_dst = (255 - sa) * da;
    let div = 255 * oa;
    for c in RED_CHANNEL..=BLUE_CHANNEL {
        let dc = dp[c] as u32;
        let sc = sp[c] as u32;
        let b = b3[c].clamp(0, 255) as u32;
        dp[c] = ((w_src * sc + w_both * b + w_dst * dc + div / 2) / div) as u8;
    }
    dp[ALPHA_CHANNEL] = oa as u8;
}

// Separable blend functions over 0..255 channel values.
// `d` is the backdrop channel, `s` the source channel.

fn comp_op_normal(_d: u32, s: u32) -> u32 {
    s
}

fn comp_op_darken(d: u32, s: u32) -> u32 {
    d.min(s)
}

fn comp_op_multiply(d: u32, s: u32) -> u32 {
    u8_mul(d, s)
}

fn comp_op_color_burn(d: u32, s: u32) -> u32 {
    if d == 255 {
        255
    } else if s == 0 {
        0
    } else {
        255 - (((255 - d) * 255 + s / 2) / s).min(255)
    }
}

fn comp_op_linear_burn(d: u32, s: u32) -> u32 {
    (d + s).saturating_sub(255)
}

fn comp_op_lighten(d: u32, s: u32) -> u32 {
    d.max(s)
}

fn comp_op_screen(d: u32, s: u32) -> u32 {
    255 - u8_mul(255 - d, 255 - s)
}

fn comp_op_color_dodge(d: u32, s: u32) -> u32 {
    if d == 0 {
        0
    } else if s == 255 {
        255
    } else {
        ((d * 255 + (255 - s) / 2) / (255 - s)).min(255)
    }
}

fn comp_op_add(d: u32, s: u32) -> u32 {
    (d + s).min(255)
}

fn comp_op_overlay(d: u32, s: u32) -> u32 {
    comp_op_hard_light(s, d)
}

fn comp_op_hard_light(d: u32, s: u32) -> u32 {
    let s2 = s * 2;
    if s2 <= 255 {
        u8_mul(d, s2)
    } else {
        comp_op_screen(d, s2 - 255)
    }
}

fn comp_op_soft_light(d: u32, s: u32) -> u32 {
    let s2 = s as i32 * 2;
    let di = d as i32;
    if s2 <= 255 {
        // d - (1-2s)*d*(1-d)
        (di - u8_mul((255 - s2) as u32, u8_mul(d, 255 - d)) as i32).clamp(0, 255) as u32
    } else {
        // d + (2s-1)*(D(d)-d), D(d) = ((16d-12)d+4)d below one quarter, sqrt(d) above
        let dd = if di * 4 <= 255 {
            let sq = u8_mul(d, d);
            4 * di + 16 * u8_mul(sq, d) as i32 - 12 * sq as i32
        } else {
            sqrt8(d) as i32
        };
        (di + u8_mul((s2 - 255) as u32, (dd - di).max(0) as u32) as i32).min(255) as u32
    }
}

// Square root in the 0..255 scale: sqrt(x/255)*255
fn sqrt8(x: u32) -> u32 {
    ((x * 255) as f64).sqrt().round() as u32
}

fn comp_op_linear_light(d: u32, s: u32) -> u32 {
    (d as i32 + 2 * s as i32 - 255).clamp(0, 255) as u32
}

fn comp_op_vivid_light(d: u32, s: u32) -> u32 {
    let s2 = s * 2;
    if s2 <= 255 {
        comp_op_color_burn(d, s2)
    } else {
        comp_op_color_dodge(d, s2 - 255)
    }
}

fn comp_op_pin_light(d: u32, s: u32) -> u32 {
    let s2 = s * 2;
    if s2 <= 255 {
        d.min(s2)
    } else {
        d.max(s2 - 255)
    }
}

fn comp_op_hard_mix(d: u32, s: u32) -> u32 {
    if d + s >= 255 {
        255
    } else {
        0
    }
}

fn comp_op_difference(d: u32, s: u32) -> u32 {
    d.max(s) - d.min(s)
}

fn comp_op_exclusion(d: u32, s: u32) -> u32 {
    d + s - 2 * u8_mul(d, s)
}

fn comp_op_subtract(d: u32, s: u32) -> u32 {
    d.saturating_sub(s)
}

fn comp_op_divide(d: u32, s: u32) -> u32 {
    if s == 0 {
        255
    } else {
        ((d * 255 + s / 2) / s).min(255)
    }
}

// Non-separable blend functions: Photoshop's luma preserving HSL moves.
// Out of gamut results are clipped by desaturating toward the luma.

type Rgb32 = [i32; 3];

fn sat3(c: Rgb32) -> i32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn clip_color(c: Rgb32) -> Rgb32 {
    let l = lum8(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0 {
        out[0] = l + ((out[0] - l) * l) / (l - n);
        out[1] = l + ((out[1] - l) * l) / (l - n);
        out[2] = l + ((out[2] - l) * l) / (l - n);
    }
    if x > 255 {
        out[0] = l + ((out[0] - l) * (255 - l)) / (x - l);
        out[1] = l + ((out[1] - l) * (255 - l)) / (x - l);
        out[2] = l + ((out[2] - l) * (255 - l)) / (x - l);
    }
    out
}

fn set_lum(c: Rgb32, l: i32) -> Rgb32 {
    let d = l - lum8(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn set_sat(c: Rgb32, s: i32) -> Rgb32 {
    let mut max = 0usize;
    let mut mid = 1usize;
    let mut min = 2usize;
    if c[max] < c[mid] {
        (max, mid) = (mid, max);
    }
    if c[max] < c[min] {
        (max, min) = (min, max);
    }
    if c[mid] < c[min] {
        (mid, min) = (min, mid);
    }

    let mut out = [0i32; 3];
    if c[max] > c[min] {
        out[mid] = ((c[mid] - c[min]) * s) / (c[max] - c[min]);
        out[max] = s;
    }
    out[min] = 0;
    out
}

fn comp_op_hue(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    set_lum(set_sat(sc, sat3(dc)), lum8(dc))
}

fn comp_op_saturation(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    set_lum(set_sat(dc, sat3(sc)), lum8(dc))
}

fn comp_op_color(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    set_lum(sc, lum8(dc))
}

fn comp_op_luminosity(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    set_lum(dc, lum8(sc))
}

// Darker/Lighter Color pick the whole pixel by luma, not per channel

fn comp_op_darker_color(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    if lum8(sc) < lum8(dc) {
        sc
    } else {
        dc
    }
}

fn comp_op_lighter_color(dc: Rgb32, sc: Rgb32) -> Rgb32 {
    if lum8(sc) > lum8(dc) {
        sc
    } else {
        dc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Blendmode;

    fn blend1(d: Pixel8, s: Pixel8, opacity: u8, mode: Blendmode) -> Pixel8 {
        let mut base = [d];
        pixel_blend(&mut base, &[s], opacity, mode);
        base[0]
    }

    #[test]
    fn test_normal_over_opaque() {
        let out = blend1([10, 20, 30, 255], [200, 100, 50, 255], 255, Blendmode::Normal);
        assert_eq!(out, [200, 100, 50, 255]);
    }

    #[test]
    fn test_normal_over_transparent() {
        let out = blend1([0, 0, 0, 0], [200, 100, 50, 255], 255, Blendmode::Normal);
        assert_eq!(out, [200, 100, 50, 255]);

        let half = blend1([0, 0, 0, 0], [200, 100, 50, 255], 128, Blendmode::Normal);
        assert_eq!(half[3], 128);
        assert_eq!(&half[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_multiply() {
        // white source is identity over an opaque backdrop
        let d = [10, 200, 99, 255];
        assert_eq!(blend1(d, [255, 255, 255, 255], 255, Blendmode::Multiply), d);
        // black source yields black
        assert_eq!(
            blend1(d, [0, 0, 0, 255], 255, Blendmode::Multiply),
            [0, 0, 0, 255]
        );
        // red times green is black
        assert_eq!(
            blend1([255, 0, 0, 255], [0, 255, 0, 255], 255, Blendmode::Multiply),
            [0, 0, 0, 255]
        );
    }

    #[test]
    fn test_screen() {
        let d = [10, 200, 99, 255];
        assert_eq!(blend1(d, [0, 0, 0, 255], 255, Blendmode::Screen), d);
        assert_eq!(
            blend1(d, [255, 255, 255, 255], 255, Blendmode::Screen),
            [255, 255, 255, 255]
        );
        assert_eq!(
            blend1([255, 0, 0, 255], [0, 255, 0, 255], 255, Blendmode::Screen),
            [255, 255, 0, 255]
        );
    }

    #[test]
    fn test_difference_self_is_black() {
        let a = [13, 77, 250, 255];
        assert_eq!(blend1(a, a, 255, Blendmode::Difference), [0, 0, 0, 255]);
    }

    #[test]
    fn test_exclusion_of_black_is_identity() {
        let a = [13, 77, 250, 255];
        assert_eq!(blend1(a, [0, 0, 0, 255], 255, Blendmode::Exclusion), a);
    }

    #[test]
    fn test_linear_dodge_adds() {
        for (d, s) in [(100u8, 100u8), (200, 200), (0, 37), (255, 1)] {
            let out = blend1([d, d, d, 255], [s, s, s, 255], 255, Blendmode::LinearDodge);
            let expected = (d as u32 + s as u32).min(255) as u8;
            assert_eq!(out, [expected, expected, expected, 255]);
        }
    }

    #[test]
    fn test_darker_color_picks_whole_pixel() {
        // Blue (low luma) over green (high luma): blue wins as a unit
        let out = blend1(
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            255,
            Blendmode::DarkerColor,
        );
        assert_eq!(out, [0, 0, 255, 255]);
        let out = blend1(
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            255,
            Blendmode::LighterColor,
        );
        assert_eq!(out, [0, 255, 0, 255]);
    }

    #[test]
    fn test_luminosity_preserves_source_luma() {
        let base = [200, 30, 90, 255];
        let over = [20, 160, 240, 255];
        let out = blend1(base, over, 255, Blendmode::Luminosity);
        let l_out = lum8([out[0] as i32, out[1] as i32, out[2] as i32]);
        let l_over = lum8([over[0] as i32, over[1] as i32, over[2] as i32]);
        assert!((l_out - l_over).abs() <= 1);
    }

    #[test]
    fn test_color_preserves_backdrop_luma() {
        let base = [200, 30, 90, 255];
        let over = [20, 160, 240, 255];
        let out = blend1(base, over, 255, Blendmode::Color);
        let l_out = lum8([out[0] as i32, out[1] as i32, out[2] as i32]);
        let l_base = lum8([base[0] as i32, base[1] as i32, base[2] as i32]);
        assert!((l_out - l_base).abs() <= 1);
    }

    #[test]
    fn test_opacity_zero_is_noop() {
        let d = [1, 2, 3, 200];
        assert_eq!(blend1(d, [255, 255, 255, 255], 0, Blendmode::Normal), d);
    }

    #[test]
    fn test_mask_blend() {
        let mut base = [[0u8, 0, 0, 255], [0, 0, 0, 255]];
        let over = [[255u8, 255, 255, 255]; 2];
        mask_blend(&mut base, &over, &[255, 0], 255, Blendmode::Normal);
        assert_eq!(base[0], [255, 255, 255, 255]);
        assert_eq!(base[1], [0, 0, 0, 255]);
    }

    #[test]
    fn test_hard_mix_threshold() {
        assert_eq!(
            blend1([100, 100, 100, 255], [200, 100, 50, 255], 255, Blendmode::HardMix),
            [255, 0, 0, 255]
        );
    }

    #[test]
    fn test_burn_dodge_edges() {
        // burn: white backdrop stays white even for zero source
        assert_eq!(comp_op_color_burn(255, 0), 255);
        assert_eq!(comp_op_color_burn(0, 128), 0);
        // dodge: black backdrop stays black even for full source
        assert_eq!(comp_op_color_dodge(0, 255), 0);
        assert_eq!(comp_op_color_dodge(128, 255), 255);
        assert_eq!(comp_op_divide(128, 0), 255);
    }
}
