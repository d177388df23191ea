//! Reference number generation
//!
//! Reference numbers are the human-traceable handle for a certificate:
//! a timestamp for ordering plus a random suffix for uniqueness within
//! the same second.

use chrono::Utc;
use rand::Rng;

const REFERENCE_PREFIX: &str = "ATT";
const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a fresh reference number, e.g. `ATT-20260807142501-X7K2P9`
pub fn generate_reference_number() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect();

    format!("{REFERENCE_PREFIX}-{timestamp}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_reference_number_shape() {
        let reference = generate_reference_number();
        let parts: Vec<&str> = reference.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ATT");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_reference_numbers_are_distinct() {
        let generated: HashSet<String> = (0..200).map(|_| generate_reference_number()).collect();
        // same-second collisions would need matching 6-char suffixes
        assert_eq!(generated.len(), 200);
    }
}
