//! 페이로드 무결성 다이제스트
//!
//! 헤더의 `HASH:<hex>` 필드. 알고리즘은 hex 길이로 구분한다.
//! - 8자리: CRC32 (IEEE)
//! - 64자리: SHA-256

use std::fmt;

use sha2::{Digest as _, Sha256};

/// 송신 측이 헤더에 실을 다이제스트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// 다이제스트 없음
    None,
    /// CRC32 (4바이트)
    Crc32,
    /// SHA-256 (32바이트)
    Sha256,
}

impl DigestKind {
    /// 페이로드에 대한 다이제스트 계산 (None이면 계산하지 않음)
    pub fn compute(self, payload: &[u8]) -> Option<Digest> {
        match self {
            DigestKind::None => None,
            DigestKind::Crc32 => Some(Digest::Crc32(crc32fast::hash(payload))),
            DigestKind::Sha256 => Some(Digest::Sha256(Sha256::digest(payload).into())),
        }
    }
}

/// 다이제스트 값
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    Crc32(u32),
    Sha256([u8; 32]),
}

impl Digest {
    pub fn kind(&self) -> DigestKind {
        match self {
            Digest::Crc32(_) => DigestKind::Crc32,
            Digest::Sha256(_) => DigestKind::Sha256,
        }
    }

    /// 같은 알고리즘으로 페이로드를 다시 계산해 비교
    pub fn verify(&self, payload: &[u8]) -> bool {
        self.kind().compute(payload).as_ref() == Some(self)
    }

    /// 소문자 hex 문자열
    pub fn to_hex(&self) -> String {
        match self {
            Digest::Crc32(crc) => format!("{:08x}", crc),
            Digest::Sha256(bytes) => hex::encode(bytes),
        }
    }

    /// hex 문자열 파싱 (길이로 알고리즘 판별)
    pub fn from_hex(s: &str) -> Option<Self> {
        // from_str_radix는 부호를 받아들임
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        match s.len() {
            8 => u32::from_str_radix(s, 16).ok().map(Digest::Crc32),
            64 => {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).ok()?;
                Some(Digest::Sha256(bytes))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_hex() {
        let digest = DigestKind::Crc32.compute(b"123456789").unwrap();
        assert_eq!(digest, Digest::Crc32(0xCBF4_3926));
        assert_eq!(digest.to_hex(), "cbf43926");
        assert_eq!(Digest::from_hex("cbf43926"), Some(digest));
    }

    #[test]
    fn test_sha256_hex() {
        let digest = DigestKind::Sha256.compute(b"abc").unwrap();
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(Digest::from_hex(&digest.to_hex()), Some(digest));
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let digest = DigestKind::Crc32.compute(b"hello").unwrap();
        assert!(digest.verify(b"hello"));
        assert!(!digest.verify(b"hellp"));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert_eq!(Digest::from_hex("abc"), None);
        assert_eq!(Digest::from_hex("zzzzzzzz"), None);
        assert_eq!(Digest::from_hex("+cbf4392"), None);
        assert_eq!(Digest::from_hex("-0000001"), None);
        assert_eq!(DigestKind::None.compute(b"x"), None);
    }
}
