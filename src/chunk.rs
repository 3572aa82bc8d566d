//! 청크 분할과 재조립
//!
//! - Chunk: 시퀀스 번호가 붙은 페이로드 조각 (기본 236 bytes)
//! - ReassemblyBuffer: 수신 측 슬롯 버퍼, 시퀀스 번호로 주소 지정

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::message::{encode_chunk, Header};

/// 청크 ID (32비트, 전송 내 시퀀스 번호)
pub type ChunkId = u32;

/// 청크 수 계산: ceil(size / chunk_size)
pub fn chunk_count(size: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// 시퀀스 번호 `seq` 청크의 페이로드 길이
///
/// 마지막 청크만 짧을 수 있다. 범위 밖이면 0.
pub fn chunk_len(size: u64, chunk_size: usize, seq: ChunkId) -> usize {
    let offset = seq as u64 * chunk_size as u64;
    if offset >= size {
        return 0;
    }
    (size - offset).min(chunk_size as u64) as usize
}

/// 청크 (송신 프레임 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 시퀀스 번호
    pub seq: ChunkId,

    /// 실제 데이터
    pub data: Bytes,
}

impl Chunk {
    pub fn new(seq: ChunkId, data: Bytes) -> Self {
        Self { seq, data }
    }

    /// 청크 프레임으로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_chunk(self.seq, &self.data)
    }
}

/// 청크 분할기 (송신측)
pub struct ChunkSplitter {
    chunk_size: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// 페이로드를 오름차순 청크들로 분할 (복사 없이 슬라이스)
    pub fn split(&self, payload: &Bytes) -> Vec<Chunk> {
        if self.chunk_size == 0 {
            return Vec::new();
        }

        (0..chunk_count(payload.len(), self.chunk_size))
            .map(|idx| {
                let start = idx * self.chunk_size;
                let end = (start + self.chunk_size).min(payload.len());
                Chunk::new(idx as ChunkId, payload.slice(start..end))
            })
            .collect()
    }
}

/// 청크 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 빈 슬롯을 채움
    Filled,
    /// 이미 채워진 슬롯을 덮어씀 (중복 수신)
    Duplicate,
    /// 시퀀스 번호가 [0, chunk_count) 밖
    OutOfRange,
}

/// 재조립 버퍼 (수신측)
///
/// 슬롯 수는 헤더의 chunk_count와 같고 처음에는 모두 비어 있다.
/// 모든 슬롯이 채워진 뒤 오름차순으로 이어 붙이면 원본 페이로드가 된다.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    header: Header,
    chunk_size: usize,
    slots: Vec<Option<Bytes>>,
    filled: u32,

    /// 생성 시간
    pub created_at: Instant,
}

impl ReassemblyBuffer {
    /// 헤더로 새 버퍼 생성
    pub fn new(header: Header, chunk_size: usize) -> Self {
        Self {
            slots: vec![None; header.chunk_count as usize],
            header,
            chunk_size,
            filled: 0,
            created_at: Instant::now(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// 청크 삽입
    ///
    /// 같은 시퀀스 번호가 다시 오면 슬롯을 덮어쓴다. 결과는 몇 번을 받아도 같다.
    pub fn insert(&mut self, seq: ChunkId, data: Bytes) -> InsertOutcome {
        let Some(slot) = self.slots.get_mut(seq as usize) else {
            return InsertOutcome::OutOfRange;
        };

        match slot.replace(data) {
            Some(_) => InsertOutcome::Duplicate,
            None => {
                self.filled += 1;
                InsertOutcome::Filled
            }
        }
    }

    /// 완료 여부 확인
    pub fn is_complete(&self) -> bool {
        self.filled as usize == self.slots.len()
    }

    /// 채워진 슬롯 수
    pub fn filled_count(&self) -> u32 {
        self.filled
    }

    /// 누락된 청크 ID 목록 반환
    pub fn missing_chunk_ids(&self) -> Vec<ChunkId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(id, _)| id as ChunkId)
            .collect()
    }

    /// 슬롯을 오름차순으로 이어 붙임
    ///
    /// 빈 슬롯은 해당 청크 길이만큼 0으로 채워 오프셋을 유지한다.
    pub fn assemble(&self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.header.size as usize);
        for (seq, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(bytes) => data.extend_from_slice(bytes),
                None => {
                    let len = chunk_len(self.header.size, self.chunk_size, seq as ChunkId);
                    data.resize(data.len() + len, 0);
                }
            }
        }
        data.freeze()
    }
}
