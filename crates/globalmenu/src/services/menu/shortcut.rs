//! Shortcut translation between the dbusmenu token vocabulary and the local
//! key-combination form.
//!
//! The wire side spells modifiers the libdbusmenu-glib way ("Super",
//! "Control") and encodes the literal `+` and `-` keys as "plus"/"minus";
//! locally we use "Meta"/"Ctrl" and the literal characters. A sequence may
//! hold several chords ("Ctrl+K, Ctrl+B" style).

/// Token pairs as (local, wire). The plus/minus rows exist for compatibility
/// with libdbusmenu-glib, which cannot carry a bare "+" or "-" token.
const TOKEN_TABLE: &[(&str, &str)] = &[
    ("Meta", "Super"),
    ("Ctrl", "Control"),
    ("+", "plus"),
    ("-", "minus"),
];

fn local_to_wire(token: &str) -> String {
    for (local, wire) in TOKEN_TABLE {
        if token == *local {
            return (*wire).to_string();
        }
    }
    token.to_string()
}

fn wire_to_local(token: &str) -> String {
    for (local, wire) in TOKEN_TABLE {
        if token == *wire {
            return (*local).to_string();
        }
    }
    token.to_string()
}

/// A key sequence: one or more chords, each a list of local key tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySequence(Vec<Vec<String>>);

impl KeySequence {
    /// Decode the wire `aas` form.
    pub fn from_wire(chords: Vec<Vec<String>>) -> Self {
        Self(
            chords
                .into_iter()
                .map(|chord| chord.iter().map(|t| wire_to_local(t)).collect())
                .collect(),
        )
    }

    /// Encode back to the wire form.
    pub fn to_wire(&self) -> Vec<Vec<String>> {
        self.0
            .iter()
            .map(|chord| chord.iter().map(|t| local_to_wire(t)).collect())
            .collect()
    }

    /// Parse a display string like "Ctrl+Shift+S, Ctrl+X".
    ///
    /// "Ctrl++" means Ctrl plus the literal `+` key; the doubled `+` is
    /// rewritten before splitting so it doesn't read as an empty token.
    pub fn parse(display: &str) -> Self {
        let chords = display
            .split(", ")
            .filter(|chord| !chord.is_empty())
            .map(|chord| {
                let chord = chord.replace("++", "+\u{0}plus");
                chord
                    .split('+')
                    .map(|t| t.trim_start_matches('\u{0}').to_string())
                    .map(|t| if t == "plus" { "+".to_string() } else { t })
                    .collect()
            })
            .collect();
        Self(chords)
    }

    /// Render as a display string for shortcut hint labels.
    pub fn display(&self) -> String {
        self.0
            .iter()
            .map(|chord| chord.join("+"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(chords: &[&[&str]]) -> Vec<Vec<String>> {
        chords
            .iter()
            .map(|c| c.iter().map(|t| t.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_wire_round_trip_plain_modifiers() {
        let input = wire(&[&["Control", "Shift", "S"]]);
        let seq = KeySequence::from_wire(input.clone());
        assert_eq!(seq.display(), "Ctrl+Shift+S");
        assert_eq!(seq.to_wire(), input);
    }

    #[test]
    fn test_wire_round_trip_super() {
        let input = wire(&[&["Super", "D"]]);
        let seq = KeySequence::from_wire(input.clone());
        assert_eq!(seq.display(), "Meta+D");
        assert_eq!(seq.to_wire(), input);
    }

    #[test]
    fn test_wire_round_trip_literal_plus() {
        let input = wire(&[&["Control", "plus"]]);
        let seq = KeySequence::from_wire(input.clone());
        assert_eq!(seq.display(), "Ctrl++");
        assert_eq!(seq.to_wire(), input);
    }

    #[test]
    fn test_wire_round_trip_literal_minus() {
        let input = wire(&[&["Control", "minus"]]);
        let seq = KeySequence::from_wire(input.clone());
        assert_eq!(seq.display(), "Ctrl+-");
        assert_eq!(seq.to_wire(), input);
    }

    #[test]
    fn test_display_round_trip_via_parse() {
        for display in ["Ctrl+Shift+S", "Meta+D", "Ctrl++", "Ctrl+K, Ctrl+B"] {
            let seq = KeySequence::parse(display);
            assert_eq!(seq.display(), display, "parse/display should round-trip");
            // And through the wire encoding as well
            let again = KeySequence::from_wire(seq.to_wire());
            assert_eq!(again, seq);
        }
    }

    #[test]
    fn test_multi_chord_sequence() {
        let input = wire(&[&["Control", "K"], &["Control", "B"]]);
        let seq = KeySequence::from_wire(input.clone());
        assert_eq!(seq.display(), "Ctrl+K, Ctrl+B");
        assert_eq!(seq.to_wire(), input);
    }

    #[test]
    fn test_empty_sequence() {
        let seq = KeySequence::default();
        assert!(seq.is_empty());
        assert_eq!(seq.display(), "");
    }
}
