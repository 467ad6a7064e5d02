//! Small free functions shared by a couple of modules. Kept separate from
//! any one component since neither belongs to it specifically (the same
//! split `hangar-py`'s `utils.py` makes for `find_next_prime` /
//! `random_string`, used by both the chunked backend and the sync layer).

use rand::RngCore as _;

/// Smallest prime `>= n`. Used to size the chunk-cache slot count.
pub fn next_prime(n: u64) -> u64 {
    fn is_prime(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        if n % 2 == 0 {
            return n == 2;
        }
        let mut d = 3;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

/// Generates a random lowercase-hex identifier for a new container file or
/// writer-lock holder, analogous to `hangar-py`'s `utils.random_string`.
pub fn random_uid() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_prime_examples() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(8), 11);
        assert_eq!(next_prime(11), 11);
        assert_eq!(next_prime(25), 29);
    }

    #[test]
    fn random_uid_is_32_hex_chars() {
        let uid = random_uid();
        assert_eq!(uid.len(), 32);
        assert!(uid.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
