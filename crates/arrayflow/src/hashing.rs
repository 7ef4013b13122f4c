use serde::Serialize;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Incremental FNV-1a hasher over serialized values.
///
/// Used for structural node signatures and config digests, which must be
/// stable across processes (unlike `DefaultHasher`).
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    state: u64,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            state: FNV1A_OFFSET,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.state = fnv1a_bytes(self.state, bytes);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Feeds the bincode encoding of `value`. Values that fail to encode
    /// contribute a fixed marker instead.
    pub fn write_serialized<T: Serialize + ?Sized>(&mut self, value: &T) {
        match bincode::serialize(value) {
            Ok(bytes) => self.write_bytes(&bytes),
            Err(_) => self.write_u64(u64::MAX),
        }
    }

    pub fn finish(self) -> u64 {
        self.state
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(FNV1A_OFFSET, bytes)
}

pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> u64 {
    let mut hasher = Fingerprint::new();
    hasher.write_serialized(value);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vector() {
        assert_eq!(fnv1a_hash(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let mut a = Fingerprint::new();
        a.write_u64(1);
        a.write_u64(2);
        let mut b = Fingerprint::new();
        b.write_u64(2);
        b.write_u64(1);
        assert_ne!(a.finish(), b.finish());
    }
}
