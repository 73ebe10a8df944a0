//! WCAG contrast and colorblind safety
//!
//! Contrast follows WCAG 2.x relative luminance (0.03928 linearization
//! threshold). Color vision deficiencies are simulated with the Machado,
//! Oliveira & Fernandes (2009) matrices at full severity, applied in
//! linear RGB.

use crate::error::ValidationError;
use dtx_core::{delta_e_2000, Rgb};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Minimum ratio for AA normal text
pub const AA_NORMAL: f64 = 4.5;
/// Minimum ratio for AA large text
pub const AA_LARGE: f64 = 3.0;
/// Minimum ratio for AAA normal text
pub const AAA_NORMAL: f64 = 7.0;
/// Minimum ratio for AAA large text
pub const AAA_LARGE: f64 = 4.5;

/// Default CIEDE2000 distance at which two colors count as distinguishable
pub const DISTINGUISHABLE_DELTA_E: f64 = 10.0;

const WHITE: Rgb = Rgb::new(255, 255, 255);
const BLACK: Rgb = Rgb::new(0, 0, 0);

fn wcag_channel(channel: u8) -> f64 {
    let v = f64::from(channel) / 255.0;
    if v <= 0.039_28 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// WCAG relative luminance, ignoring alpha
#[must_use]
pub fn relative_luminance(color: Rgb) -> f64 {
    0.2126 * wcag_channel(color.r) + 0.7152 * wcag_channel(color.g) + 0.0722 * wcag_channel(color.b)
}

/// Contrast ratio in [1, 21]; symmetric in its arguments
#[must_use]
pub fn contrast_ratio_rgb(a: Rgb, b: Rgb) -> f64 {
    let (la, lb) = (relative_luminance(a), relative_luminance(b));
    let (light, dark) = if la >= lb { (la, lb) } else { (lb, la) };
    (light + 0.05) / (dark + 0.05)
}

/// Contrast ratio between two hex colors
///
/// # Errors
/// Returns [`ValidationError::InvalidColor`] if either value is not strict hex.
pub fn contrast_ratio(a: &str, b: &str) -> Result<f64, ValidationError> {
    let parse = |s: &str| Rgb::from_hex(s.trim()).map_err(|_| ValidationError::InvalidColor(s.to_string()));
    Ok(contrast_ratio_rgb(parse(a)?, parse(b)?))
}

/// Alpha-composite `color` over an opaque background
#[must_use]
pub fn composite_over(color: Rgb, background: Rgb) -> Rgb {
    let alpha = f64::from(color.a) / 255.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mix = |fg: u8, bg: u8| (f64::from(fg) * alpha + f64::from(bg) * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
    Rgb::new(
        mix(color.r, background.r),
        mix(color.g, background.g),
        mix(color.b, background.b),
    )
}

/// WCAG pass/fail per level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Compliance {
    pub aa_normal: bool,
    pub aa_large: bool,
    pub aaa_normal: bool,
    pub aaa_large: bool,
}

impl Compliance {
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        Self {
            aa_normal: ratio >= AA_NORMAL,
            aa_large: ratio >= AA_LARGE,
            aaa_normal: ratio >= AAA_NORMAL,
            aaa_large: ratio >= AAA_LARGE,
        }
    }

    /// Tier score: AAA 1.0, AA 0.75, AA-large 0.5, otherwise scaled below 0.25
    #[must_use]
    pub fn tier_score(ratio: f64) -> f64 {
        let c = Self::from_ratio(ratio);
        if c.aaa_normal {
            1.0
        } else if c.aa_normal {
            0.75
        } else if c.aa_large {
            0.5
        } else {
            (0.25 * ratio / AA_LARGE).clamp(0.0, 0.25)
        }
    }
}

/// Simulated color vision deficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Deficiency {
    Protanopia,
    Deuteranopia,
    Tritanopia,
}

impl Deficiency {
    pub const ALL: [Deficiency; 3] = [
        Deficiency::Protanopia,
        Deficiency::Deuteranopia,
        Deficiency::Tritanopia,
    ];

    const fn matrix(self) -> [[f64; 3]; 3] {
        match self {
            Deficiency::Protanopia => [
                [0.152_286, 1.052_583, -0.204_868],
                [0.114_503, 0.786_281, 0.099_216],
                [-0.003_882, -0.048_116, 1.051_998],
            ],
            Deficiency::Deuteranopia => [
                [0.367_322, 0.860_646, -0.227_968],
                [0.280_085, 0.672_501, 0.047_413],
                [-0.011_820, 0.042_940, 0.968_881],
            ],
            Deficiency::Tritanopia => [
                [1.255_528, -0.076_749, -0.178_779],
                [-0.078_411, 0.930_809, 0.147_602],
                [0.004_733, 0.691_367, 0.303_900],
            ],
        }
    }

    /// How `color` appears under this deficiency
    #[must_use]
    pub fn simulate(self, color: Rgb) -> Rgb {
        let m = self.matrix();
        let [r, g, b] = color.to_linear();
        let out = [
            m[0][0] * r + m[0][1] * g + m[0][2] * b,
            m[1][0] * r + m[1][1] * g + m[1][2] * b,
            m[2][0] * r + m[2][1] * g + m[2][2] * b,
        ];
        Rgb::from_linear(out, color.a)
    }
}

impl fmt::Display for Deficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Deficiency::Protanopia => "protanopia",
            Deficiency::Deuteranopia => "deuteranopia",
            Deficiency::Tritanopia => "tritanopia",
        };
        f.write_str(name)
    }
}

/// Two palette colors that become indistinguishable under a deficiency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollapsedPair {
    pub first: String,
    pub second: String,
    pub deficiency: Deficiency,
    pub simulated_delta_e: f64,
}

/// Colorblind safety of a palette
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteReport {
    /// Share of distinguishable pairs that stay distinguishable, per deficiency
    pub scores: BTreeMap<Deficiency, f64>,
    pub collapsed: Vec<CollapsedPair>,
}

impl PaletteReport {
    /// Worst score across deficiencies
    #[must_use]
    pub fn worst(&self) -> f64 {
        self.scores.values().copied().fold(1.0, f64::min)
    }
}

/// Contrast and colorblind scoring
#[derive(Debug, Clone, Copy)]
pub struct AccessibilityCalculator {
    distinguishable: f64,
}

impl Default for AccessibilityCalculator {
    fn default() -> Self {
        Self {
            distinguishable: DISTINGUISHABLE_DELTA_E,
        }
    }
}

impl AccessibilityCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With the distinguishability threshold (CIEDE2000)
    #[inline]
    #[must_use]
    pub fn with_distinguishable(mut self, delta_e: f64) -> Self {
        self.distinguishable = delta_e;
        self
    }

    /// See [`contrast_ratio`]
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidColor`] for malformed hex.
    pub fn contrast_ratio(&self, a: &str, b: &str) -> Result<f64, ValidationError> {
        contrast_ratio(a, b)
    }

    /// Compliance between two hex colors
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidColor`] for malformed hex.
    pub fn compliance(&self, a: &str, b: &str) -> Result<Compliance, ValidationError> {
        contrast_ratio(a, b).map(Compliance::from_ratio)
    }

    /// Best contrast of `color` against white or black, compositing
    /// translucent colors over each background first
    #[must_use]
    pub fn best_contrast(&self, color: Rgb) -> f64 {
        let on_white = contrast_ratio_rgb(composite_over(color, WHITE), WHITE);
        let on_black = contrast_ratio_rgb(composite_over(color, BLACK), BLACK);
        on_white.max(on_black)
    }

    fn distinguishable(&self, a: Rgb, b: Rgb) -> (bool, f64) {
        let d = delta_e_2000(a.to_lab(), b.to_lab());
        (d >= self.distinguishable, d)
    }

    /// Score a palette under each simulated deficiency
    #[must_use]
    pub fn colorblind_safety(&self, palette: &[Rgb]) -> PaletteReport {
        let mut totals: BTreeMap<Deficiency, (usize, usize)> =
            Deficiency::ALL.iter().map(|d| (*d, (0, 0))).collect();
        let mut collapsed = Vec::new();

        for (i, &a) in palette.iter().enumerate() {
            for &b in &palette[i + 1..] {
                if !self.distinguishable(a, b).0 {
                    continue;
                }
                for deficiency in Deficiency::ALL {
                    let (survives, d) = self.distinguishable(deficiency.simulate(a), deficiency.simulate(b));
                    let entry = totals.entry(deficiency).or_insert((0, 0));
                    entry.0 += 1;
                    if survives {
                        entry.1 += 1;
                    } else {
                        collapsed.push(CollapsedPair {
                            first: a.to_hex(),
                            second: b.to_hex(),
                            deficiency,
                            simulated_delta_e: d,
                        });
                    }
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let scores = totals
            .into_iter()
            .map(|(d, (pairs, kept))| (d, if pairs == 0 { 1.0 } else { kept as f64 / pairs as f64 }))
            .collect();
        PaletteReport { scores, collapsed }
    }

    /// Share of `color`'s distinguishable palette pairs that survive every
    /// simulation; 1.0 when it has none
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn survival(&self, color: Rgb, palette: &[Rgb]) -> f64 {
        let mut pairs = 0usize;
        let mut kept = 0usize;
        for &other in palette {
            if other == color || !self.distinguishable(color, other).0 {
                continue;
            }
            pairs += 1;
            let survives = Deficiency::ALL
                .iter()
                .all(|d| self.distinguishable(d.simulate(color), d.simulate(other)).0);
            if survives {
                kept += 1;
            }
        }
        if pairs == 0 {
            1.0
        } else {
            kept as f64 / pairs as f64
        }
    }

    /// Accessibility score of one color in its palette:
    /// `0.6 * contrast tier + 0.4 * colorblind survival`
    #[must_use]
    pub fn color_score(&self, color: Rgb, palette: &[Rgb]) -> f64 {
        let tier = Compliance::tier_score(self.best_contrast(color));
        (0.6 * tier + 0.4 * self.survival(color, palette)).clamp(0.0, 1.0)
    }
}
