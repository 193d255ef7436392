//! dbusmenu item types and `a{sv}` property parsing.
//!
//! The wire protocol describes every menu item as a property map. Only keys
//! present in a map are meaningful: an update that omits a key leaves the
//! local value untouched, so everything here is parsed into `Option`s.
//!
//! Wire property reference (com.canonical.dbusmenu):
//! - `type`: "standard" (default) or "separator"
//! - `children-display`: "submenu" when the item owns a child menu
//! - `toggle-type`: "checkmark" or "radio"
//! - `toggle-state`: i32, 0 = off, 1 = on, anything else = indeterminate
//! - `label`: string with `_` mnemonic marker, `__` escapes a literal `_`
//! - `enabled`, `visible`: booleans, default true
//! - `icon-name`: themed icon; `icon-data`: inline PNG bytes (mutually
//!   exclusive with icon-name, last writer wins)
//! - `shortcut`: array of key-token arrays (one inner array per chord)

use std::collections::HashMap;

use gtk4::glib::Variant;
use sha2::{Digest, Sha256};

use super::shortcut::KeySequence;

/// Remote menu item id. The root menu is always id 0.
pub type MenuId = i32;

/// Reserved id of the root menu.
pub const ROOT_ID: MenuId = 0;

/// Structural kind of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemKind {
    #[default]
    Standard,
    Separator,
}

/// Checkable behavior of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleKind {
    #[default]
    None,
    Checkmark,
    Radio,
}

/// Item icon: themed name or inline bitmap bytes.
///
/// Inline payloads carry a sha256 digest so repeated updates with the same
/// pixels can be recognized without comparing the full byte vector.
#[derive(Debug, Clone, Default)]
pub enum IconSource {
    #[default]
    None,
    Named(String),
    Data { digest: [u8; 32], bytes: Vec<u8> },
}

impl IconSource {
    pub fn from_data(bytes: Vec<u8>) -> Self {
        let digest = Sha256::digest(&bytes).into();
        Self::Data { digest, bytes }
    }

    /// Whether two sources denote the same icon.
    pub fn same_as(&self, other: &IconSource) -> bool {
        match (self, other) {
            (IconSource::None, IconSource::None) => true,
            (IconSource::Named(a), IconSource::Named(b)) => a == b,
            (IconSource::Data { digest: a, .. }, IconSource::Data { digest: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// A parsed partial property update for one item.
///
/// `None` means "key absent, leave the current value alone". The nested
/// options on `toggle_state` and `shortcut` distinguish "not mentioned" from
/// "explicitly cleared".
#[derive(Debug, Clone, Default)]
pub struct PropertyUpdate {
    pub kind: Option<ItemKind>,
    pub has_submenu: Option<bool>,
    pub toggle_kind: Option<ToggleKind>,
    pub label: Option<String>,
    pub enabled: Option<bool>,
    pub visible: Option<bool>,
    pub toggle_state: Option<Option<bool>>,
    pub icon: Option<IconSource>,
    pub shortcut: Option<Option<KeySequence>>,
}

impl PropertyUpdate {
    /// Parse a wire `a{sv}` property map.
    ///
    /// Malformed values degrade to "no value" rather than erroring: a bad
    /// shortcut payload becomes no shortcut, a bad icon becomes no icon.
    pub fn from_variant_map(map: &HashMap<String, Variant>) -> Self {
        let mut update = PropertyUpdate::default();

        if let Some(v) = map.get("type") {
            update.kind = Some(match v.str() {
                Some("separator") => ItemKind::Separator,
                _ => ItemKind::Standard,
            });
        }

        if let Some(v) = map.get("children-display") {
            update.has_submenu = Some(v.str() == Some("submenu"));
        }

        if let Some(v) = map.get("toggle-type") {
            update.toggle_kind = Some(match v.str() {
                Some("checkmark") => ToggleKind::Checkmark,
                Some("radio") => ToggleKind::Radio,
                _ => ToggleKind::None,
            });
        }

        if let Some(v) = map.get("label") {
            update.label = Some(v.str().unwrap_or_default().to_string());
        }

        if let Some(v) = map.get("enabled") {
            update.enabled = Some(v.get::<bool>().unwrap_or(true));
        }

        if let Some(v) = map.get("visible") {
            update.visible = Some(v.get::<bool>().unwrap_or(true));
        }

        if let Some(v) = map.get("toggle-state") {
            update.toggle_state = Some(match v.get::<i32>() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            });
        }

        // icon-name and icon-data are mutually exclusive; when both appear in
        // one map the name wins, matching what exporters actually send.
        if let Some(v) = map.get("icon-name") {
            let name = v.str().unwrap_or_default();
            update.icon = Some(if name.is_empty() {
                IconSource::None
            } else {
                IconSource::Named(name.to_string())
            });
        } else if let Some(v) = map.get("icon-data") {
            update.icon = Some(match v.get::<Vec<u8>>() {
                Some(bytes) if !bytes.is_empty() => IconSource::from_data(bytes),
                _ => IconSource::None,
            });
        }

        if let Some(v) = map.get("shortcut") {
            update.shortcut = Some(
                v.get::<Vec<Vec<String>>>()
                    .filter(|chords| !chords.is_empty())
                    .map(KeySequence::from_wire),
            );
        }

        update
    }

    /// Build an update that resets the named keys to their documented
    /// defaults, for `ItemsPropertiesUpdated` removal lists.
    pub fn from_removed_keys(keys: &[String]) -> Self {
        let mut update = PropertyUpdate::default();
        for key in keys {
            match key.as_str() {
                "type" => update.kind = Some(ItemKind::Standard),
                "children-display" => update.has_submenu = Some(false),
                "toggle-type" => update.toggle_kind = Some(ToggleKind::None),
                "label" => update.label = Some(String::new()),
                "enabled" => update.enabled = Some(true),
                "visible" => update.visible = Some(true),
                "toggle-state" => update.toggle_state = Some(None),
                "icon-name" | "icon-data" => update.icon = Some(IconSource::None),
                "shortcut" => update.shortcut = Some(None),
                _ => {}
            }
        }
        update
    }

    /// Whether this update has no effect at all.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.has_submenu.is_none()
            && self.toggle_kind.is_none()
            && self.label.is_none()
            && self.enabled.is_none()
            && self.visible.is_none()
            && self.toggle_state.is_none()
            && self.icon.is_none()
            && self.shortcut.is_none()
    }
}

/// Move a mnemonic marker between two conventions.
///
/// The first un-doubled `src` becomes `dst`; a doubled `src` is a literal;
/// later mnemonics are dropped; `dst` occurrences in the input are escaped by
/// doubling. A trailing lone `src` is skipped.
pub fn swap_mnemonic_char(input: &str, src: char, dst: char) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut mnemonic_found = false;

    let mut pos = 0;
    while pos < chars.len() {
        let ch = chars[pos];
        if ch == src {
            if pos == chars.len() - 1 {
                pos += 1;
            } else if chars[pos + 1] == src {
                out.push(src);
                pos += 2;
            } else if !mnemonic_found {
                mnemonic_found = true;
                out.push(dst);
                pos += 1;
            } else {
                pos += 1;
            }
        } else if ch == dst {
            out.push(dst);
            out.push(dst);
            pos += 1;
        } else {
            out.push(ch);
            pos += 1;
        }
    }

    out
}

/// Strip the mnemonic marker from a wire label for plain-text display,
/// collapsing `__` escapes to a literal underscore.
pub fn strip_mnemonic(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    let mut out = String::with_capacity(label.len());

    let mut pos = 0;
    while pos < chars.len() {
        if chars[pos] == '_' {
            if pos + 1 < chars.len() && chars[pos + 1] == '_' {
                out.push('_');
                pos += 2;
            } else {
                pos += 1;
            }
        } else {
            out.push(chars[pos]);
            pos += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtk4::glib::prelude::*;

    fn map(entries: &[(&str, Variant)]) -> HashMap<String, Variant> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_separator() {
        let update = PropertyUpdate::from_variant_map(&map(&[("type", "separator".to_variant())]));
        assert_eq!(update.kind, Some(ItemKind::Separator));
        assert!(update.label.is_none());
    }

    #[test]
    fn test_parse_toggle_state() {
        let on = PropertyUpdate::from_variant_map(&map(&[("toggle-state", 1i32.to_variant())]));
        assert_eq!(on.toggle_state, Some(Some(true)));

        let off = PropertyUpdate::from_variant_map(&map(&[("toggle-state", 0i32.to_variant())]));
        assert_eq!(off.toggle_state, Some(Some(false)));

        let indeterminate =
            PropertyUpdate::from_variant_map(&map(&[("toggle-state", 3i32.to_variant())]));
        assert_eq!(indeterminate.toggle_state, Some(None));
    }

    #[test]
    fn test_icon_name_wins_over_data() {
        let update = PropertyUpdate::from_variant_map(&map(&[
            ("icon-name", "document-open".to_variant()),
            ("icon-data", vec![1u8, 2, 3].to_variant()),
        ]));
        assert!(matches!(update.icon, Some(IconSource::Named(ref n)) if n == "document-open"));
    }

    #[test]
    fn test_icon_data_digest_comparison() {
        let a = IconSource::from_data(vec![1, 2, 3]);
        let b = IconSource::from_data(vec![1, 2, 3]);
        let c = IconSource::from_data(vec![4, 5, 6]);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(!a.same_as(&IconSource::None));
    }

    #[test]
    fn test_malformed_shortcut_falls_back_to_none() {
        // Wrong type for the shortcut key
        let update = PropertyUpdate::from_variant_map(&map(&[("shortcut", 42i32.to_variant())]));
        assert_eq!(update.shortcut, Some(None));
    }

    #[test]
    fn test_removed_keys_reset_to_defaults() {
        let update =
            PropertyUpdate::from_removed_keys(&["enabled".to_string(), "icon-name".to_string()]);
        assert_eq!(update.enabled, Some(true));
        assert!(matches!(update.icon, Some(IconSource::None)));
        assert!(update.label.is_none());
    }

    #[test]
    fn test_swap_mnemonic_basic() {
        assert_eq!(swap_mnemonic_char("_File", '_', '&'), "&File");
        assert_eq!(swap_mnemonic_char("&File", '&', '_'), "_File");
    }

    #[test]
    fn test_swap_mnemonic_doubled_is_literal() {
        assert_eq!(swap_mnemonic_char("Foo__Bar", '_', '&'), "Foo_Bar");
    }

    #[test]
    fn test_swap_mnemonic_second_marker_dropped() {
        assert_eq!(swap_mnemonic_char("_Fi_le", '_', '&'), "&File");
    }

    #[test]
    fn test_swap_mnemonic_escapes_destination() {
        assert_eq!(swap_mnemonic_char("Drag & Drop", '_', '&'), "Drag && Drop");
    }

    #[test]
    fn test_swap_mnemonic_trailing_marker_skipped() {
        assert_eq!(swap_mnemonic_char("File_", '_', '&'), "File");
    }

    #[test]
    fn test_strip_mnemonic() {
        assert_eq!(strip_mnemonic("_File"), "File");
        assert_eq!(strip_mnemonic("Foo__Bar"), "Foo_Bar");
        assert_eq!(strip_mnemonic("Plain"), "Plain");
    }
}
