use rc4::consts::U64;
use rc4::{Key, KeyInit, Rc4, StreamCipher};

use crate::proto::{IV_LEN, MAX_KEY_LEN};

pub const KEY_LEN: usize = 64;

/// Derive the 64-byte session key from the connection IV and the
/// pre-shared key:
///
/// ```text
/// k[0..16]  = MD5(IV || PSK)
/// k[16..32] = MD5(k[0..16])
/// k[32..48] = MD5(k[0..32])
/// k[48..64] = MD5(k[0..48])
/// ```
///
/// Keys longer than 256 bytes hash as their first 256 bytes.
pub fn derive_key(iv: &[u8; IV_LEN], key: &[u8]) -> [u8; KEY_LEN] {
    let key = &key[..key.len().min(MAX_KEY_LEN)];

    let mut material = Vec::with_capacity(IV_LEN + key.len());
    material.extend_from_slice(iv);
    material.extend_from_slice(key);

    let mut out = [0u8; KEY_LEN];
    let digest = md5::compute(&material);
    out[..16].copy_from_slice(&digest.0);
    let digest = md5::compute(&out[..16]);
    out[16..32].copy_from_slice(&digest.0);
    let digest = md5::compute(&out[..32]);
    out[32..48].copy_from_slice(&digest.0);
    let digest = md5::compute(&out[..48]);
    out[48..64].copy_from_slice(&digest.0);
    out
}

/// One direction of the session keystream.
pub struct CipherStream {
    rc4: Rc4<U64>,
}

impl CipherStream {
    fn new(key: &[u8; KEY_LEN]) -> CipherStream {
        CipherStream {
            rc4: Rc4::new(Key::<U64>::from_slice(key)),
        }
    }

    #[inline]
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.rc4.apply_keystream(buf);
    }
}

/// Per-connection cipher state. Both directions start from the same
/// derived key but advance independently; one peer's `enc` stream is the
/// other peer's `dec` stream.
pub struct Crypto {
    enc: CipherStream,
    dec: CipherStream,
}

impl Crypto {
    pub fn new(key: &[u8; KEY_LEN]) -> Crypto {
        Crypto {
            enc: CipherStream::new(key),
            dec: CipherStream::new(key),
        }
    }

    #[inline]
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.enc.apply(buf);
    }

    #[inline]
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.dec.apply(buf);
    }

    pub fn into_split(self) -> (CipherStream, CipherStream) {
        (self.enc, self.dec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn iv(byte: u8) -> [u8; IV_LEN] {
        [byte; IV_LEN]
    }

    #[test]
    fn test_derive_key_deterministic() {
        let a = derive_key(&iv(0x11), b"secret");
        let b = derive_key(&iv(0x11), b"secret");
        assert_eq!(a, b);

        assert_ne!(a, derive_key(&iv(0x12), b"secret"));
        assert_ne!(a, derive_key(&iv(0x11), b"other"));
    }

    #[test]
    fn test_derive_key_truncates_long_keys() {
        let long = vec![0xabu8; 300];
        let a = derive_key(&iv(0x42), &long);
        let b = derive_key(&iv(0x42), &long[..MAX_KEY_LEN]);
        assert_eq!(a, b);

        // one byte short of the cap still matters
        let c = derive_key(&iv(0x42), &long[..MAX_KEY_LEN - 1]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_round_trip() {
        let key = derive_key(&iv(0x33), b"round trip");
        let mut client = Crypto::new(&key);
        let mut server = Crypto::new(&key);

        let plain = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut buf = plain.clone();
        client.encrypt(&mut buf);
        assert_ne!(buf, plain);
        server.decrypt(&mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_directions_are_independent() {
        let key = derive_key(&iv(0x7f), b"duplex");
        let mut client = Crypto::new(&key);
        let mut server = Crypto::new(&key);

        // interleave unequal amounts in both directions; each side's enc
        // stream must stay in lock-step with the peer's dec stream
        for (up_len, down_len) in [(3usize, 17usize), (256, 1), (1, 1024)] {
            let up: Vec<u8> = (0..up_len).map(|i| i as u8).collect();
            let mut buf = up.clone();
            client.encrypt(&mut buf);
            server.decrypt(&mut buf);
            assert_eq!(buf, up);

            let down: Vec<u8> = (0..down_len).map(|i| !(i as u8)).collect();
            let mut buf = down.clone();
            server.encrypt(&mut buf);
            client.decrypt(&mut buf);
            assert_eq!(buf, down);
        }
    }
}
