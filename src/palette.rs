//! Fixed canvas palette (free + paid tiers) and the per-session colour selection.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 24-bit colour as `[r, g, b]`.
pub type Rgb = [u8; 3];

/// One entry of the fixed palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaletteColor {
    pub rgb: Rgb,
    pub name: &'static str,
}

impl PaletteColor {
    pub fn key(&self) -> String {
        color_key(self.rgb)
    }

    pub fn hex(&self) -> String {
        rgb_to_hex(self.rgb)
    }
}

/// Palette tier as defined by the host canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Paid,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[Tier::Free, Tier::Paid]
    }

    pub fn colors(self) -> &'static [Rgb] {
        match self {
            Tier::Free => &FREE,
            Tier::Paid => &PAID,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => f.write_str("free"),
            Tier::Paid => f.write_str("paid"),
        }
    }
}

/// Free tier, in declared order.
pub const FREE: [Rgb; 31] = [
    [0, 0, 0], [60, 60, 60], [120, 120, 120], [210, 210, 210], [255, 255, 255],
    [96, 0, 24], [237, 28, 36], [255, 127, 39], [246, 170, 9], [249, 221, 59], [255, 250, 188],
    [14, 185, 104], [19, 230, 123], [135, 255, 94],
    [12, 129, 110], [16, 174, 166], [19, 225, 190], [96, 247, 242],
    [40, 80, 158], [64, 147, 228],
    [107, 80, 246], [153, 177, 251],
    [120, 12, 153], [170, 56, 185], [224, 159, 249],
    [203, 0, 122], [236, 31, 128], [243, 141, 169],
    [104, 70, 52], [149, 104, 42], [248, 178, 119],
];

/// Paid tier, in declared order.
pub const PAID: [Rgb; 32] = [
    [170, 170, 170],
    [165, 14, 30], [250, 128, 114],
    [228, 92, 26], [156, 132, 49], [197, 173, 49], [232, 212, 95],
    [74, 107, 58], [90, 148, 74], [132, 197, 115],
    [15, 121, 159], [187, 250, 242], [125, 199, 255],
    [77, 49, 184], [122, 113, 196], [181, 174, 241],
    [74, 66, 132], [51, 57, 65], [109, 117, 141], [179, 185, 209],
    [155, 82, 73], [209, 128, 120], [250, 182, 164],
    [219, 164, 99], [123, 99, 82], [156, 132, 107], [214, 181, 148],
    [209, 128, 81], [255, 197, 165],
    [109, 100, 63], [148, 140, 107], [205, 197, 158],
];

const NAMES: [(Rgb, &str); 63] = [
    ([0, 0, 0], "Black"),
    ([60, 60, 60], "Dark Gray"),
    ([120, 120, 120], "Gray"),
    ([170, 170, 170], "Medium Gray"),
    ([210, 210, 210], "Light Gray"),
    ([255, 255, 255], "White"),
    ([96, 0, 24], "Deep Red"),
    ([165, 14, 30], "Dark Red"),
    ([237, 28, 36], "Red"),
    ([250, 128, 114], "Light Red"),
    ([228, 92, 26], "Dark Orange"),
    ([255, 127, 39], "Orange"),
    ([246, 170, 9], "Gold"),
    ([249, 221, 59], "Yellow"),
    ([255, 250, 188], "Light Yellow"),
    ([156, 132, 49], "Dark Goldenrod"),
    ([197, 173, 49], "Goldenrod"),
    ([232, 212, 95], "Light Goldenrod"),
    ([74, 107, 58], "Dark Olive"),
    ([90, 148, 74], "Olive"),
    ([132, 197, 115], "Light Olive"),
    ([14, 185, 104], "Dark Green"),
    ([19, 230, 123], "Green"),
    ([135, 255, 94], "Light Green"),
    ([12, 129, 110], "Dark Teal"),
    ([16, 174, 166], "Teal"),
    ([19, 225, 190], "Light Teal"),
    ([15, 121, 159], "Dark Cyan"),
    ([96, 247, 242], "Cyan"),
    ([187, 250, 242], "Light Cyan"),
    ([40, 80, 158], "Dark Blue"),
    ([64, 147, 228], "Blue"),
    ([125, 199, 255], "Light Blue"),
    ([77, 49, 184], "Dark Indigo"),
    ([107, 80, 246], "Indigo"),
    ([153, 177, 251], "Light Indigo"),
    ([74, 66, 132], "Dark Slate Blue"),
    ([122, 113, 196], "Slate Blue"),
    ([181, 174, 241], "Light Slate Blue"),
    ([120, 12, 153], "Dark Purple"),
    ([170, 56, 185], "Purple"),
    ([224, 159, 249], "Light Purple"),
    ([203, 0, 122], "Dark Pink"),
    ([236, 31, 128], "Pink"),
    ([243, 141, 169], "Light Pink"),
    ([155, 82, 73], "Dark Peach"),
    ([209, 128, 120], "Peach"),
    ([250, 182, 164], "Light Peach"),
    ([104, 70, 52], "Dark Brown"),
    ([149, 104, 42], "Brown"),
    ([219, 164, 99], "Light Brown"),
    ([123, 99, 82], "Dark Tan"),
    ([156, 132, 107], "Tan"),
    ([214, 181, 148], "Light Tan"),
    ([209, 128, 81], "Dark Beige"),
    ([248, 178, 119], "Beige"),
    ([255, 197, 165], "Light Beige"),
    ([109, 100, 63], "Dark Stone"),
    ([148, 140, 107], "Stone"),
    ([205, 197, 158], "Light Stone"),
    ([51, 57, 65], "Dark Slate"),
    ([109, 117, 141], "Slate"),
    ([179, 185, 209], "Light Slate"),
];

// ============================================================================
// Conversions
// ============================================================================

/// `"r,g,b"`: decimal, no padding, no spaces.
pub fn color_key(rgb: Rgb) -> String {
    format!("{},{},{}", rgb[0], rgb[1], rgb[2])
}

/// Parse a colour key.  Anything other than exactly three decimal bytes is rejected.
pub fn parse_color_key(key: &str) -> Option<Rgb> {
    let mut parts = key.split(',');
    let r = parts.next()?.parse::<u8>().ok()?;
    let g = parts.next()?.parse::<u8>().ok()?;
    let b = parts.next()?.parse::<u8>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([r, g, b])
}

/// Lowercase `#rrggbb`.
pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Parse `#rrggbb` or `rrggbb` (either case).
pub fn hex_to_rgb(hex: &str) -> Option<Rgb> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Display name for a colour key; unknown keys are returned unchanged.
pub fn color_name(key: &str) -> &str {
    match parse_color_key(key) {
        Some(rgb) => NAMES
            .iter()
            .find(|(c, _)| *c == rgb)
            .map(|(_, name)| *name)
            .unwrap_or(key),
        None => key,
    }
}

/// Iterate a tier as named palette entries.
pub fn colors(tier: Tier) -> impl Iterator<Item = PaletteColor> {
    tier.colors().iter().map(|&rgb| PaletteColor {
        rgb,
        name: NAMES
            .iter()
            .find(|(c, _)| *c == rgb)
            .map(|(_, name)| *name)
            .unwrap_or("Unnamed"),
    })
}

/// Which tier a colour key belongs to, if any.
pub fn tier_of(key: &str) -> Option<Tier> {
    let rgb = parse_color_key(key)?;
    Tier::all()
        .iter()
        .copied()
        .find(|tier| tier.colors().contains(&rgb))
}

pub fn default_free_keys() -> Vec<String> {
    FREE.iter().map(|&c| color_key(c)).collect()
}

pub fn default_paid_keys() -> Vec<String> {
    PAID.iter().map(|&c| color_key(c)).collect()
}

// ============================================================================
// Selection
// ============================================================================

/// Colours the user currently allows, split by tier.
///
/// Members are always valid keys of their tier: keys that do not belong are
/// dropped on construction, on toggle and on deserialisation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SelectionRecord", into = "SelectionRecord")]
pub struct SelectedColorSet {
    free: BTreeSet<String>,
    paid: BTreeSet<String>,
}

/// Persisted shape of a selection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionRecord {
    #[serde(default)]
    selected_free_colors: Vec<String>,
    #[serde(default)]
    selected_paid_colors: Vec<String>,
}

impl From<SelectionRecord> for SelectedColorSet {
    fn from(record: SelectionRecord) -> Self {
        SelectedColorSet::from_keys(record.selected_free_colors, record.selected_paid_colors)
    }
}

impl From<SelectedColorSet> for SelectionRecord {
    fn from(set: SelectedColorSet) -> Self {
        // Palette order keeps the stored lists stable and readable.
        SelectionRecord {
            selected_free_colors: set.keys_in_palette_order(Tier::Free),
            selected_paid_colors: set.keys_in_palette_order(Tier::Paid),
        }
    }
}

impl SelectedColorSet {
    /// Seed for a fresh upload session: every free colour, no paid colour.
    pub fn new_session() -> Self {
        Self::from_keys(default_free_keys(), Vec::<String>::new())
    }

    pub fn all() -> Self {
        Self::from_keys(default_free_keys(), default_paid_keys())
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Build a selection, ignoring keys that are not part of the given tier.
    pub fn from_keys<I, J>(free: I, paid: J) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        let mut set = Self::default();
        for key in free {
            set.insert(Tier::Free, key.into());
        }
        for key in paid {
            set.insert(Tier::Paid, key.into());
        }
        set
    }

    fn insert(&mut self, tier: Tier, key: String) -> bool {
        if tier_of(&key) != Some(tier) {
            crate::log_warn!("Ignoring colour {:?}: not a {} palette key", key, tier);
            return false;
        }
        // Normalise so "0,0,0" and "000,0,0" cannot both be members
        let normalised = parse_color_key(&key).map(color_key).unwrap_or(key);
        self.tier_set_mut(tier).insert(normalised)
    }

    fn tier_set(&self, tier: Tier) -> &BTreeSet<String> {
        match tier {
            Tier::Free => &self.free,
            Tier::Paid => &self.paid,
        }
    }

    fn tier_set_mut(&mut self, tier: Tier) -> &mut BTreeSet<String> {
        match tier {
            Tier::Free => &mut self.free,
            Tier::Paid => &mut self.paid,
        }
    }

    pub fn contains(&self, tier: Tier, key: &str) -> bool {
        self.tier_set(tier).contains(key)
    }

    /// Flip one colour.  Returns whether it is selected afterwards; keys
    /// outside the tier are left alone and report `false`.
    pub fn toggle(&mut self, tier: Tier, key: &str) -> bool {
        let canonical = parse_color_key(key).map(color_key);
        if self.tier_set_mut(tier).remove(canonical.as_deref().unwrap_or(key)) {
            return false;
        }
        self.insert(tier, key.to_string())
    }

    /// Clear the tier when it is fully selected, otherwise select all of it.
    pub fn toggle_all(&mut self, tier: Tier) {
        if self.all_selected(tier) {
            self.tier_set_mut(tier).clear();
        } else {
            let keys: Vec<String> = tier.colors().iter().map(|&c| color_key(c)).collect();
            self.tier_set_mut(tier).extend(keys);
        }
    }

    pub fn all_selected(&self, tier: Tier) -> bool {
        tier.colors()
            .iter()
            .all(|&c| self.tier_set(tier).contains(&color_key(c)))
    }

    /// `(selected, total)` for a tier.
    pub fn count(&self, tier: Tier) -> (usize, usize) {
        (self.tier_set(tier).len(), tier.colors().len())
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty() && self.paid.is_empty()
    }

    pub fn keys_in_palette_order(&self, tier: Tier) -> Vec<String> {
        tier.colors()
            .iter()
            .map(|&c| color_key(c))
            .filter(|k| self.tier_set(tier).contains(k))
            .collect()
    }

    /// Allowed colours in palette iteration order: free tier first, then
    /// paid, each in declared order.
    pub fn allowed_colors(&self) -> Vec<Rgb> {
        Tier::all()
            .iter()
            .flat_map(|&tier| {
                tier.colors()
                    .iter()
                    .copied()
                    .filter(move |&c| self.tier_set(tier).contains(&color_key(c)))
            })
            .collect()
    }
}
