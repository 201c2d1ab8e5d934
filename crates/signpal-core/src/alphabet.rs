/// Letters taught by a learning session, in teaching order.
pub const ALPHABET: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Index of the final letter ("Z").
pub const LAST_INDEX: usize = ALPHABET.len() - 1;

/// Letter at `index`, or `None` past the end of the alphabet.
#[must_use]
pub fn letter_at(index: usize) -> Option<char> {
    ALPHABET.get(index).copied()
}

/// Case-insensitive comparison between a classifier label and a letter.
///
/// Labels are free-form strings from the model (e.g. "a", "B", "space"),
/// so only single-letter labels can ever match.
#[must_use]
pub fn label_matches(label: &str, letter: char) -> bool {
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_ascii_uppercase() == letter.to_ascii_uppercase(),
        _ => false,
    }
}
