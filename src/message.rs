//! 프레임 정의 및 인코딩
//!
//! 채널에는 프레이밍이 없으므로 모든 프레임이 스스로 경계를 가진다.
//!
//! ```text
//! 헤더:   IDENTIFIER:<name>,SIZE:<decimal>,CHUNKS:<decimal>[,HASH:<hex>]\n
//! 청크:   [seq: u32 BE][payload ...]          (payload 길이는 헤더에서 유도)
//! 제어:   [FF FF FF FF][tag: 3 bytes ASCII]   (END / ACK / PNG / PON)
//! ```
//!
//! 제어 프레임의 접두사 `0xFFFFFFFF`는 어떤 청크도 가질 수 없는 시퀀스
//! 번호이므로 청크 프레임과 겹치지 않는다.

use std::fmt;

use crate::chunk::{chunk_count, ChunkId};
use crate::digest::Digest;
use crate::{Error, Result};

/// 헤더 줄의 유일한 구분자
pub const HEADER_DELIMITER: u8 = b'\n';

/// 헤더 줄의 시작
pub const HEADER_PREFIX: &[u8] = b"IDENTIFIER:";

/// 제어 프레임 접두사 (청크가 가질 수 없는 시퀀스 번호)
pub const CONTROL_PREFIX: [u8; 4] = [0xFF; 4];

/// 제어 프레임 전체 길이
pub const CONTROL_FRAME_LEN: usize = 7;

/// 청크 시퀀스 번호 길이
pub const SEQUENCE_LEN: usize = 4;

/// 제어 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// 전송 종료 표시
    End,
    /// 전체 전송 수신 확인
    Ack,
    /// 연결 테스트 요청
    Probe,
    /// 연결 테스트 응답
    ProbeReply,
}

impl Control {
    fn tag(self) -> &'static [u8; 3] {
        match self {
            Control::End => b"END",
            Control::Ack => b"ACK",
            Control::Probe => b"PNG",
            Control::ProbeReply => b"PON",
        }
    }

    pub(crate) fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"END" => Some(Control::End),
            b"ACK" => Some(Control::Ack),
            b"PNG" => Some(Control::Probe),
            b"PON" => Some(Control::ProbeReply),
            _ => None,
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(self) -> [u8; CONTROL_FRAME_LEN] {
        let mut buf = [0u8; CONTROL_FRAME_LEN];
        buf[..4].copy_from_slice(&CONTROL_PREFIX);
        buf[4..].copy_from_slice(self.tag());
        buf
    }
}

/// 전송 헤더
///
/// 전송 시작 시 한 번 보내고 한 번 파싱한다. 이후 변경되지 않는다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// 전송 식별자 (보통 파일 이름)
    pub identifier: String,

    /// 페이로드 전체 크기
    pub size: u64,

    /// 청크 수
    pub chunk_count: u32,

    /// 무결성 다이제스트 (선택)
    pub digest: Option<Digest>,
}

impl Header {
    /// 페이로드에서 헤더 생성
    pub fn new(
        identifier: &str,
        size: usize,
        chunk_size: usize,
        digest: Option<Digest>,
    ) -> Result<Self> {
        validate_identifier(identifier)?;
        let count = chunk_count(size, chunk_size);
        let chunk_count =
            ChunkId::try_from(count).map_err(|_| Error::PayloadTooLarge { size })?;

        Ok(Self {
            identifier: identifier.to_string(),
            size: size as u64,
            chunk_count,
            digest,
        })
    }

    /// 헤더 줄 파싱 (구분자 제외)
    ///
    /// 키 순서는 자유지만 IDENTIFIER/SIZE/CHUNKS는 정확히 한 번씩 있어야 한다.
    pub fn parse(line: &[u8]) -> std::result::Result<Self, String> {
        let line = std::str::from_utf8(line).map_err(|_| "header is not valid UTF-8".to_string())?;

        let mut identifier = None;
        let mut size = None;
        let mut chunk_count = None;
        let mut digest = None;

        for field in line.split(',') {
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| format!("field without ':' separator: {:?}", field))?;

            let duplicate = match key {
                "IDENTIFIER" => identifier.replace(value.to_string()).is_some(),
                "SIZE" => size
                    .replace(value.parse::<u64>().map_err(|_| format!("bad SIZE: {:?}", value))?)
                    .is_some(),
                "CHUNKS" => chunk_count
                    .replace(value.parse::<u32>().map_err(|_| format!("bad CHUNKS: {:?}", value))?)
                    .is_some(),
                "HASH" => digest
                    .replace(Digest::from_hex(value).ok_or_else(|| format!("bad HASH: {:?}", value))?)
                    .is_some(),
                _ => return Err(format!("unknown key: {:?}", key)),
            };
            if duplicate {
                return Err(format!("duplicate key: {}", key));
            }
        }

        let identifier = identifier.ok_or("missing IDENTIFIER")?;
        if identifier.is_empty() {
            return Err("empty IDENTIFIER".into());
        }

        Ok(Self {
            identifier,
            size: size.ok_or("missing SIZE")?,
            chunk_count: chunk_count.ok_or("missing CHUNKS")?,
            digest,
        })
    }

    /// 바이트로 직렬화 (구분자 포함)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut line = format!(
            "IDENTIFIER:{},SIZE:{},CHUNKS:{}",
            self.identifier, self.size, self.chunk_count
        );
        if let Some(digest) = &self.digest {
            line.push_str(",HASH:");
            line.push_str(&digest.to_hex());
        }
        let mut buf = line.into_bytes();
        buf.push(HEADER_DELIMITER);
        buf
    }

    /// 같은 전송의 재전송 헤더인지 확인
    pub fn same_transfer(&self, other: &Header) -> bool {
        self == other
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {} chunks)",
            self.identifier, self.size, self.chunk_count
        )
    }
}

/// 식별자 검증: 비어 있지 않고 구분자(`\n`)와 필드 구분자(`,`)를 포함하지 않아야 함
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.contains(['\n', ',']) {
        return Err(Error::InvalidIdentifier {
            identifier: identifier.to_string(),
        });
    }
    Ok(())
}

/// 헤더 프레임 인코딩
pub fn encode_header(header: &Header) -> Vec<u8> {
    header.to_bytes()
}

/// 청크 프레임 인코딩
pub fn encode_chunk(seq: ChunkId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEQUENCE_LEN + payload.len());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// 종료 프레임 인코딩
pub fn encode_end() -> [u8; CONTROL_FRAME_LEN] {
    Control::End.to_bytes()
}

/// ACK 프레임 인코딩
pub fn encode_ack() -> [u8; CONTROL_FRAME_LEN] {
    Control::Ack.to_bytes()
}

/// 연결 테스트 요청 인코딩
pub fn encode_probe() -> [u8; CONTROL_FRAME_LEN] {
    Control::Probe.to_bytes()
}

/// 연결 테스트 응답 인코딩
pub fn encode_probe_reply() -> [u8; CONTROL_FRAME_LEN] {
    Control::ProbeReply.to_bytes()
}
