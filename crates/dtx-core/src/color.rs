//! Color science primitives
//!
//! Provides [`Rgb`] (parsed from strict hex notation), [`Lab`] (CIELAB,
//! D65 white point) and [`delta_e_2000`], the CIEDE2000 perceptual
//! distance used by deduplication and colorblind scoring.

use crate::error::CoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Strict hex color pattern: `#RGB`, `#RRGGBB` or `#RRGGBBAA`
pub static HEX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9A-Fa-f]{3}|[0-9A-Fa-f]{6}|[0-9A-Fa-f]{8})$")
        .expect("valid hex pattern")
});

/// D65 reference white
const WHITE_X: f64 = 0.950_47;
const WHITE_Y: f64 = 1.0;
const WHITE_Z: f64 = 1.088_83;

const EPSILON: f64 = 6.0 / 29.0;

/// 8-bit sRGB color with alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgb {
    /// Opaque color from channels
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Check whether a string is a strictly formatted hex color
    #[inline]
    #[must_use]
    pub fn is_hex(s: &str) -> bool {
        HEX_PATTERN.is_match(s)
    }

    /// Parse strict hex notation
    ///
    /// # Errors
    /// Returns `CoreError::InvalidHex` for anything but `#RGB`, `#RRGGBB`
    /// or `#RRGGBBAA`.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        if !Self::is_hex(s) {
            return Err(CoreError::InvalidHex(s.to_string()));
        }
        let digits = &s[1..];
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|_| CoreError::InvalidHex(s.to_string()))
        };
        match digits.len() {
            3 => {
                let expand = |i: usize| {
                    u8::from_str_radix(&digits[i..=i], 16)
                        .map(|v| v * 17)
                        .map_err(|_| CoreError::InvalidHex(s.to_string()))
                };
                Ok(Self::new(expand(0)?, expand(1)?, expand(2)?))
            }
            6 => Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
            _ => Ok(Self {
                r: channel(0..2)?,
                g: channel(2..4)?,
                b: channel(4..6)?,
                a: channel(6..8)?,
            }),
        }
    }

    /// Uppercase hex, `#RRGGBB` when opaque and `#RRGGBBAA` otherwise
    #[must_use]
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }

    /// Whether the color carries transparency
    #[inline]
    #[must_use]
    pub const fn is_translucent(&self) -> bool {
        self.a < 255
    }

    /// Linear-light channels in [0, 1]
    #[must_use]
    pub fn to_linear(&self) -> [f64; 3] {
        [
            srgb_to_linear(self.r),
            srgb_to_linear(self.g),
            srgb_to_linear(self.b),
        ]
    }

    /// Build from linear-light channels (clamped), keeping the given alpha
    #[must_use]
    pub fn from_linear(linear: [f64; 3], a: u8) -> Self {
        Self {
            r: linear_to_srgb(linear[0]),
            g: linear_to_srgb(linear[1]),
            b: linear_to_srgb(linear[2]),
            a,
        }
    }

    /// Convert to CIELAB (D65)
    #[must_use]
    pub fn to_lab(&self) -> Lab {
        let [r, g, b] = self.to_linear();
        let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
        let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
        let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

        let fx = lab_f(x / WHITE_X);
        let fy = lab_f(y / WHITE_Y);
        let fz = lab_f(z / WHITE_Z);

        Lab {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}

/// CIELAB color (D65 white point)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    /// Convert back to 8-bit sRGB (out-of-gamut values are clamped)
    #[must_use]
    pub fn to_rgb(&self, alpha: u8) -> Rgb {
        let fy = (self.l + 16.0) / 116.0;
        let fx = fy + self.a / 500.0;
        let fz = fy - self.b / 200.0;

        let x = WHITE_X * lab_f_inv(fx);
        let y = WHITE_Y * lab_f_inv(fy);
        let z = WHITE_Z * lab_f_inv(fz);

        let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
        let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
        let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

        Rgb::from_linear([r, g, b], alpha)
    }

    /// Weighted mean of Lab colors; `None` when the total weight is zero
    #[must_use]
    pub fn weighted_mean<I>(items: I) -> Option<Lab>
    where
        I: IntoIterator<Item = (Lab, f64)>,
    {
        let (mut l, mut a, mut b, mut total) = (0.0, 0.0, 0.0, 0.0);
        for (lab, weight) in items {
            l += lab.l * weight;
            a += lab.a * weight;
            b += lab.b * weight;
            total += weight;
        }
        if total <= f64::EPSILON {
            return None;
        }
        Some(Lab {
            l: l / total,
            a: a / total,
            b: b / total,
        })
    }
}

/// CIEDE2000 color difference (Sharma, Wu & Dalal formulation)
///
/// Differences below ~2.0 are treated as one just-noticeable difference.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn delta_e_2000(lab1: Lab, lab2: Lab) -> f64 {
    const POW25_7: f64 = 6_103_515_625.0;

    let c1 = lab1.a.hypot(lab1.b);
    let c2 = lab2.a.hypot(lab2.b);
    let c_bar = (c1 + c2) / 2.0;
    let c_bar7 = c_bar.powi(7);
    let g = 0.5 * (1.0 - (c_bar7 / (c_bar7 + POW25_7)).sqrt());

    let a1p = (1.0 + g) * lab1.a;
    let a2p = (1.0 + g) * lab2.a;
    let c1p = a1p.hypot(lab1.b);
    let c2p = a2p.hypot(lab2.b);

    let h1p = hue_degrees(lab1.b, a1p);
    let h2p = hue_degrees(lab2.b, a2p);

    let dl = lab2.l - lab1.l;
    let dc = c2p - c1p;

    let dh = if c1p * c2p == 0.0 {
        0.0
    } else {
        let diff = h2p - h1p;
        if diff.abs() <= 180.0 {
            diff
        } else if diff > 180.0 {
            diff - 360.0
        } else {
            diff + 360.0
        }
    };
    let d_big_h = 2.0 * (c1p * c2p).sqrt() * (dh.to_radians() / 2.0).sin();

    let l_bar = (lab1.l + lab2.l) / 2.0;
    let cp_bar = (c1p + c2p) / 2.0;

    let hp_bar = if c1p * c2p == 0.0 {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (hp_bar - 30.0).to_radians().cos()
        + 0.24 * (2.0 * hp_bar).to_radians().cos()
        + 0.32 * (3.0 * hp_bar + 6.0).to_radians().cos()
        - 0.20 * (4.0 * hp_bar - 63.0).to_radians().cos();

    let d_theta = 30.0 * (-((hp_bar - 275.0) / 25.0).powi(2)).exp();
    let cp_bar7 = cp_bar.powi(7);
    let r_c = 2.0 * (cp_bar7 / (cp_bar7 + POW25_7)).sqrt();
    let l_term = (l_bar - 50.0).powi(2);
    let s_l = 1.0 + 0.015 * l_term / (20.0 + l_term).sqrt();
    let s_c = 1.0 + 0.045 * cp_bar;
    let s_h = 1.0 + 0.015 * cp_bar * t;
    let r_t = -(2.0 * d_theta).to_radians().sin() * r_c;

    let l_part = dl / s_l;
    let c_part = dc / s_c;
    let h_part = d_big_h / s_h;

    (l_part * l_part + c_part * c_part + h_part * h_part + r_t * c_part * h_part)
        .max(0.0)
        .sqrt()
}

fn hue_degrees(b: f64, a_prime: f64) -> f64 {
    if a_prime == 0.0 && b == 0.0 {
        return 0.0;
    }
    let h = b.atan2(a_prime).to_degrees();
    if h < 0.0 {
        h + 360.0
    } else {
        h
    }
}

fn srgb_to_linear(channel: u8) -> f64 {
    let v = f64::from(channel) / 255.0;
    if v <= 0.040_45 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn linear_to_srgb(v: f64) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let encoded = if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f64) -> f64 {
    if t > EPSILON.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * EPSILON * EPSILON) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f64) -> f64 {
    if t > EPSILON {
        t.powi(3)
    } else {
        3.0 * EPSILON * EPSILON * (t - 4.0 / 29.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_all_hex_lengths() {
        assert_eq!(Rgb::from_hex("#fff").unwrap(), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::from_hex("#FF8000").unwrap(), Rgb::new(255, 128, 0));
        let translucent = Rgb::from_hex("#00000080").unwrap();
        assert_eq!(translucent.a, 0x80);
        assert!(translucent.is_translucent());
    }

    #[test]
    fn rejects_loose_hex() {
        for bad in ["FF0000", "#FF00", "#GG0000", "#FF0000 ", "rgb(0,0,0)", "#FF00000"] {
            assert!(Rgb::from_hex(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn hex_formatting_is_uppercase() {
        assert_eq!(Rgb::new(171, 205, 239).to_hex(), "#ABCDEF");
        assert_eq!(Rgb::from_hex("#abcdef80").unwrap().to_hex(), "#ABCDEF80");
    }

    #[test]
    fn lab_of_white_and_black() {
        let white = Rgb::new(255, 255, 255).to_lab();
        assert!((white.l - 100.0).abs() < 0.01);
        assert!(white.a.abs() < 0.01 && white.b.abs() < 0.01);

        let black = Rgb::new(0, 0, 0).to_lab();
        assert!(black.l.abs() < 0.01);
    }

    #[test]
    fn lab_round_trip_is_stable() {
        for hex in ["#FF0000", "#00FF00", "#3366CC", "#808080", "#123456"] {
            let rgb = Rgb::from_hex(hex).unwrap();
            assert_eq!(rgb.to_lab().to_rgb(255), rgb, "{hex}");
        }
    }

    #[test]
    fn ciede2000_reference_pairs() {
        // Sharma et al. test data, pairs 1 and 7
        let d1 = delta_e_2000(
            Lab { l: 50.0, a: 2.6772, b: -79.7751 },
            Lab { l: 50.0, a: 0.0, b: -82.7485 },
        );
        assert!((d1 - 2.0425).abs() < 1e-4, "got {d1}");

        let d7 = delta_e_2000(
            Lab { l: 50.0, a: 0.0, b: 0.0 },
            Lab { l: 50.0, a: -1.0, b: 2.0 },
        );
        assert!((d7 - 2.3669).abs() < 1e-4, "got {d7}");
    }

    #[test]
    fn near_identical_reds_are_below_one_jnd() {
        let a = Rgb::from_hex("#FF0000").unwrap().to_lab();
        let b = Rgb::from_hex("#FE0101").unwrap().to_lab();
        assert!(delta_e_2000(a, b) < 2.0);
    }

    #[test]
    fn red_and_green_are_far_apart() {
        let a = Rgb::from_hex("#FF0000").unwrap().to_lab();
        let b = Rgb::from_hex("#00FF00").unwrap().to_lab();
        assert!(delta_e_2000(a, b) > 50.0);
    }

    #[test]
    fn weighted_mean_respects_weights() {
        let a = Lab { l: 10.0, a: 0.0, b: 0.0 };
        let b = Lab { l: 40.0, a: 0.0, b: 0.0 };
        let mean = Lab::weighted_mean([(a, 2.0), (b, 1.0)]).unwrap();
        assert!((mean.l - 20.0).abs() < 1e-9);
        assert!(Lab::weighted_mean([(a, 0.0)]).is_none());
    }

    proptest! {
        #[test]
        fn delta_e_is_symmetric(r1: u8, g1: u8, b1: u8, r2: u8, g2: u8, b2: u8) {
            let x = Rgb::new(r1, g1, b1).to_lab();
            let y = Rgb::new(r2, g2, b2).to_lab();
            prop_assert!((delta_e_2000(x, y) - delta_e_2000(y, x)).abs() < 1e-9);
        }

        #[test]
        fn delta_e_of_self_is_zero(r: u8, g: u8, b: u8) {
            let x = Rgb::new(r, g, b).to_lab();
            prop_assert!(delta_e_2000(x, x).abs() < 1e-9);
        }
    }
}
