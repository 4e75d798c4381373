//! Lock/key challenge and direction number generation.

use rand::Rng;

/// Prefix every lock we issue starts with, signalling extended protocol support.
pub const LOCK_PREFIX: &[u8] = b"EXTENDEDPROTOCOL";

const RANDOM_LOCK_LEN: usize = 46;
const RANDOM_PK_LEN: usize = 16;

/// Highest value (exclusive) used for `$Direction` tie-break numbers.
pub const DIRECTION_NUMBER_LIMIT: u32 = 0x7fff;

/// Derives the `$Key` response for a `$Lock` challenge.
///
/// Each byte is XORed with its predecessor (the first byte with the last two
/// bytes and `5`), nibble-swapped, and a handful of byte values are replaced
/// by `/%DCN<ddd>%/` escapes. Indices wrap for locks shorter than two bytes.
pub fn generate_key(lock: &[u8]) -> Vec<u8> {
    let len = lock.len();
    if len == 0 {
        return Vec::new();
    }

    let mut key = Vec::with_capacity(len * 2);
    for i in 0..len {
        let mixed = if i == 0 {
            lock[0] ^ lock[len - 1] ^ lock[(len + len - 2) % len] ^ 5
        } else {
            lock[i] ^ lock[i - 1]
        };
        let swapped = mixed.rotate_left(4);

        match swapped {
            0 | 5 | 36 | 96 | 124 | 126 => {
                key.extend_from_slice(format!("/%DCN{swapped:03}%/").as_bytes());
            }
            byte => key.push(byte),
        }
    }
    key
}

/// A freshly generated lock challenge and its `Pk=` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChallenge {
    pub lock: Vec<u8>,
    pub pk: Vec<u8>,
}

impl LockChallenge {
    /// Generates `EXTENDEDPROTOCOL` followed by random uppercase letters.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut lock = LOCK_PREFIX.to_vec();
        lock.extend((0..RANDOM_LOCK_LEN).map(|_| rng.random_range(b'A'..=b'Z')));
        let pk = (0..RANDOM_PK_LEN)
            .map(|_| rng.random_range(b'A'..=b'Z'))
            .collect();
        Self { lock, pk }
    }

    /// Key a correct peer should answer with.
    pub fn expected_key(&self) -> Vec<u8> {
        generate_key(&self.lock)
    }
}

/// Returns whether a lock advertises the extended protocol.
pub fn is_extended_lock(lock: &[u8]) -> bool {
    lock.starts_with(LOCK_PREFIX)
}

/// Random number used to break `$Direction` ties.
pub fn random_direction_number() -> u32 {
    rand::rng().random_range(0..DIRECTION_NUMBER_LIMIT)
}
