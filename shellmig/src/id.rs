use nanoid::nanoid;

/// Alphabet for lock owner tokens (no ambiguous glyphs).
const OWNER_TOKEN_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const OWNER_TOKEN_LENGTH: usize = 24;

/// Generates the value a lock handle stores in a lease-based lock key.
///
/// Only the handle holding the matching token may renew or release the lock.
pub fn generate_owner_token() -> String {
    nanoid!(OWNER_TOKEN_LENGTH, OWNER_TOKEN_ALPHABET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_length_and_charset() {
        let token = generate_owner_token();
        assert_eq!(token.len(), OWNER_TOKEN_LENGTH);
        assert!(token.chars().all(|c| OWNER_TOKEN_ALPHABET.contains(&c)));
    }

    #[test]
    fn tokens_differ_between_handles() {
        assert_ne!(generate_owner_token(), generate_owner_token());
    }
}
