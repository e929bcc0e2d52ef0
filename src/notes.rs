//! MIDI note naming.
//!
//! Two spellings of the same pitch are needed: a display label for the
//! remote UI (`C2`, `C#2`) and a file stem that sample players such as
//! GrandOrgue expect (`036-c`, `037-c#`). The stem carries no octave, the
//! MIDI number already makes it unique.

use serde::Serialize;

/// Pitch classes, lowercase, sharps spelled with `#`.
pub const NOTE_NAMES: [&str; 12] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// Pitch class of a MIDI number (`0` = C).
pub fn pitch_class(note: i32) -> &'static str {
    NOTE_NAMES[note.rem_euclid(12) as usize]
}

/// Octave in scientific pitch notation, where MIDI 60 is C4.
pub fn octave(note: i32) -> i32 {
    note.div_euclid(12) - 1
}

/// Human label such as `C2` or `F#-1`.
pub fn display_name(note: i32) -> String {
    format!("{}{}", pitch_class(note).to_uppercase(), octave(note))
}

/// File stem such as `036-c` or `061-c#`.
pub fn file_stem(note: i32) -> String {
    format!("{:03}-{}", note, pitch_class(note))
}

/// Position of the current note inside the configured range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteInfo {
    pub total: u32,
    pub done: u32,
    pub remaining: u32,
    pub current_midi: u8,
    pub current_name: String,
    pub current_filename: String,
}

impl NoteInfo {
    pub fn new(start: u8, end: u8, current: u8, extension: &str) -> Self {
        let total = (end as u32).saturating_sub(start as u32) + 1;
        let done = (current as u32).saturating_sub(start as u32).min(total);
        Self {
            total,
            done,
            remaining: total - done,
            current_midi: current,
            current_name: display_name(current as i32),
            current_filename: format!("{}.{}", file_stem(current as i32), extension),
        }
    }

    /// Fraction of the range already behind the pointer.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_matches_grandorgue_convention() {
        assert_eq!(file_stem(36), "036-c");
        assert_eq!(file_stem(37), "037-c#");
        assert_eq!(file_stem(38), "038-d");
        assert_eq!(file_stem(96), "096-c");
        assert_eq!(file_stem(127), "127-g");
        assert_eq!(file_stem(0), "000-c");
    }

    #[test]
    fn test_display_name_carries_octave() {
        assert_eq!(display_name(36), "C2");
        assert_eq!(display_name(60), "C4");
        assert_eq!(display_name(61), "C#4");
        assert_eq!(display_name(12), "C0");
        assert_eq!(display_name(24), "C1");
        assert_eq!(display_name(0), "C-1");
        assert_eq!(display_name(127), "G9");
    }

    #[test]
    fn test_every_midi_note_has_a_well_formed_stem() {
        for n in 0..=127 {
            let stem = file_stem(n);
            let (number, class) = stem.split_once('-').expect("stem has a hyphen");
            assert_eq!(number.len(), 3, "stem {stem}");
            assert!(number.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(number.parse::<i32>().unwrap(), n);

            let mut chars = class.chars();
            let letter = chars.next().unwrap();
            assert!(('a'..='g').contains(&letter), "stem {stem}");
            let rest: String = chars.collect();
            assert!(rest.is_empty() || rest == "#", "stem {stem}");
        }
    }

    #[test]
    fn test_display_name_round_trips_to_pitch_class_and_octave() {
        for n in 0..=127 {
            let label = display_name(n);
            let split = label
                .find(|c: char| c.is_ascii_digit() || c == '-')
                .unwrap();
            let (class, oct) = label.split_at(split);
            assert_eq!(class.to_lowercase(), pitch_class(n));
            assert_eq!(oct.parse::<i32>().unwrap(), n / 12 - 1);
        }
    }

    #[test]
    fn test_note_info_progress() {
        let info = NoteInfo::new(36, 45, 40, "mp3");
        assert_eq!(info.total, 10);
        assert_eq!(info.done, 4);
        assert_eq!(info.remaining, 6);
        assert_eq!(info.current_name, "E2");
        assert_eq!(info.current_filename, "040-e.mp3");
        assert!((info.progress() - 0.4).abs() < f64::EPSILON);
    }
}
