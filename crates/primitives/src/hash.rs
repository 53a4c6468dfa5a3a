use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use slpwallet_consensus::Hash256;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    sha256(&sha256(data))
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(sha256(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_of_empty_input() {
        let digest = sha256d(b"");
        assert_eq!(digest[0], 0x5d);
        assert_eq!(digest[31], 0x56);
    }

    #[test]
    fn hash160_of_empty_input() {
        let digest = hash160(b"");
        assert_eq!(digest[0], 0xb4);
        assert_eq!(digest[19], 0xcb);
    }
}
