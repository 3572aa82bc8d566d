//! 증분 프레임 디코더
//!
//! 채널에서 읽은 바이트를 몇 번에 나눠 넣든 같은 이벤트 열을 만든다.
//! 누적 버퍼(`BytesMut`) 하나와 명시적 상태 머신으로 동작하며, 헤더의
//! 구분자 탐색은 마지막으로 본 위치부터 이어서 하므로 전체 비용은 받은
//! 바이트 수에 비례한다.
//!
//! - `Idle`: 헤더 또는 제어 프레임 대기
//! - `Chunks`: 헤더 파싱 완료, 청크/제어 프레임 대기
//! - `Resyncing`: 범위 밖 청크 뒤에서 다음 프레임 시작을 찾는 중
//!
//! 청크 본문 안에서 구분자나 마커를 찾지 않는다. 청크 길이는 헤더와
//! 청크 크기로부터 정해진다. 범위 밖 청크는 길이를 알 수 없으므로, 뒤따르는
//! 바이트에서 제어 프레임, 헤더, 또는 끝이 다른 프레임 시작과 맞물리는
//! 범위 안 청크가 나오는 첫 위치로 다시 맞춘다.

use std::iter::FusedIterator;

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::chunk::{chunk_len, Chunk, ChunkId};
use crate::message::{
    Control, Header, CONTROL_FRAME_LEN, CONTROL_PREFIX, HEADER_DELIMITER, HEADER_PREFIX,
    SEQUENCE_LEN,
};

/// 헤더 줄 최대 길이
pub const MAX_HEADER_LEN: usize = 1024;

/// 디코딩 에러 (세션을 끝내지 않음)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("잘못된 헤더: {0}")]
    MalformedHeader(String),

    #[error("헤더 줄이 너무 김: {len} bytes")]
    HeaderTooLong { len: usize },

    #[error("범위 밖 시퀀스 번호: seq={seq}, chunk_count={chunk_count}")]
    SequenceOutOfRange { seq: ChunkId, chunk_count: u32 },

    #[error("허용 크기 초과 헤더: {size} bytes > {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("알 수 없는 제어 프레임: {tag:02X?}")]
    UnknownControl { tag: [u8; 3] },

    #[error("프레임이 아닌 바이트 {skipped}개 건너뜀")]
    UnexpectedBytes { skipped: usize },
}

/// 디코딩 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Header(Header),
    Chunk(Chunk),
    End,
    Ack,
    Probe,
    ProbeReply,
    Error(DecodeError),
}

/// 헤더에서 얻은 청크 배치
#[derive(Debug, Clone, Copy)]
struct Geometry {
    size: u64,
    chunk_count: u32,
}

/// 4바이트 단어가 무엇의 시작으로 보이는지
enum FrameStart {
    Frame,
    Chunk(ChunkId),
    None,
}

impl Geometry {
    fn classify(&self, word: &[u8]) -> FrameStart {
        if word == CONTROL_PREFIX || word == &HEADER_PREFIX[..SEQUENCE_LEN] {
            return FrameStart::Frame;
        }
        let seq = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        if seq < self.chunk_count {
            FrameStart::Chunk(seq)
        } else {
            FrameStart::None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Chunks(Geometry),
    Resyncing(Geometry),
}

/// 증분 프레임 디코더
pub struct FrameDecoder {
    /// 아직 소비하지 않은 바이트
    buffer: BytesMut,

    /// 현재 파싱 상태
    state: State,

    /// 송신 측과 합의된 청크 크기
    chunk_size: usize,

    /// 헤더 구분자를 이미 찾아본 길이
    scanned: usize,

    /// 받아들일 최대 SIZE
    max_payload: u64,
}

impl FrameDecoder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::Idle,
            chunk_size,
            scanned: 0,
            max_payload: u64::MAX,
        }
    }

    /// SIZE가 `max`보다 큰 헤더는 에러로 보고하고 헤더 대기 상태로 돌아감
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max as u64;
        self
    }

    /// 바이트를 넣고 이벤트 이터레이터를 받는다
    ///
    /// 이터레이터는 게으르게 동작한다. 끝까지 소비하지 않으면 남은
    /// 바이트는 버퍼에 남아 다음 `feed`에서 이어서 디코딩된다.
    pub fn feed(&mut self, data: &[u8]) -> Events<'_> {
        self.buffer.extend_from_slice(data);
        Events {
            decoder: self,
            finished: false,
        }
    }

    /// 버퍼에 남은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 헤더를 받아 청크를 기다리는 중인지
    pub fn in_transfer(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    fn next_event(&mut self) -> Option<FrameEvent> {
        match self.state {
            State::Idle => self.next_idle(),
            State::Chunks(geometry) => self.next_chunk(geometry),
            State::Resyncing(geometry) => self.resync(geometry),
        }
    }

    fn next_idle(&mut self) -> Option<FrameEvent> {
        let first = *self.buffer.first()?;

        if first == CONTROL_PREFIX[0] {
            let n = self.buffer.len().min(CONTROL_PREFIX.len());
            if self.buffer[..n] == CONTROL_PREFIX[..n] {
                return self.next_control();
            }
        } else if first == HEADER_PREFIX[0] {
            let n = self.buffer.len().min(HEADER_PREFIX.len());
            if self.buffer[..n] == HEADER_PREFIX[..n] {
                return self.next_header();
            }
        }

        Some(self.skip_garbage())
    }

    /// 다음 프레임 시작 후보까지 건너뜀
    fn skip_garbage(&mut self) -> FrameEvent {
        let skipped = self.buffer[1..]
            .iter()
            .position(|&b| b == CONTROL_PREFIX[0] || b == HEADER_PREFIX[0])
            .map_or(self.buffer.len(), |pos| pos + 1);
        self.buffer.advance(skipped);
        self.scanned = 0;
        FrameEvent::Error(DecodeError::UnexpectedBytes { skipped })
    }

    fn next_header(&mut self) -> Option<FrameEvent> {
        let Some(pos) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == HEADER_DELIMITER)
        else {
            self.scanned = self.buffer.len();
            if self.buffer.len() > MAX_HEADER_LEN {
                let len = self.buffer.len();
                self.buffer.clear();
                self.scanned = 0;
                return Some(FrameEvent::Error(DecodeError::HeaderTooLong { len }));
            }
            return None;
        };

        let end = self.scanned + pos;
        let line = self.buffer.split_to(end + 1);
        self.scanned = 0;

        let line = &line[..end];
        if line.len() > MAX_HEADER_LEN {
            return Some(FrameEvent::Error(DecodeError::HeaderTooLong { len: line.len() }));
        }

        let header = match Header::parse(line) {
            Ok(header) => header,
            Err(reason) => return Some(FrameEvent::Error(DecodeError::MalformedHeader(reason))),
        };

        let expected = header.size.div_ceil(self.chunk_size.max(1) as u64);
        if expected != header.chunk_count as u64 {
            return Some(FrameEvent::Error(DecodeError::MalformedHeader(format!(
                "CHUNKS:{} does not match SIZE:{} at chunk size {}",
                header.chunk_count, header.size, self.chunk_size
            ))));
        }

        if header.size > self.max_payload {
            // 이전 전송의 배치로 이 전송의 청크를 해석하지 않도록
            self.state = State::Idle;
            return Some(FrameEvent::Error(DecodeError::PayloadTooLarge {
                size: header.size,
                max: self.max_payload,
            }));
        }

        self.state = State::Chunks(Geometry {
            size: header.size,
            chunk_count: header.chunk_count,
        });
        Some(FrameEvent::Header(header))
    }

    fn next_chunk(&mut self, geometry: Geometry) -> Option<FrameEvent> {
        if self.buffer.len() < SEQUENCE_LEN {
            return None;
        }

        if self.buffer[..SEQUENCE_LEN] == CONTROL_PREFIX {
            return self.next_control();
        }

        let seq = u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]]);

        if seq >= geometry.chunk_count {
            // 송신 측이 전송을 처음부터 다시 시작함
            if self.buffer[..SEQUENCE_LEN] == HEADER_PREFIX[..SEQUENCE_LEN] {
                self.state = State::Idle;
                self.scanned = 0;
                return self.next_idle();
            }

            self.buffer.advance(SEQUENCE_LEN);
            self.state = State::Resyncing(geometry);
            return Some(FrameEvent::Error(DecodeError::SequenceOutOfRange {
                seq,
                chunk_count: geometry.chunk_count,
            }));
        }

        let len = chunk_len(geometry.size, self.chunk_size, seq);
        if self.buffer.len() < SEQUENCE_LEN + len {
            return None;
        }

        self.buffer.advance(SEQUENCE_LEN);
        let data = self.buffer.split_to(len).freeze();
        Some(FrameEvent::Chunk(Chunk::new(seq, data)))
    }

    /// 범위 밖 청크 본문을 건너뛰고 다음 프레임 시작에 맞춤
    ///
    /// 판단에 필요한 바이트가 아직 없으면 그 위치에서 멈추고 기다린다.
    fn resync(&mut self, geometry: Geometry) -> Option<FrameEvent> {
        let mut pos = 0;
        loop {
            let Some(word) = self.buffer.get(pos..pos + SEQUENCE_LEN) else {
                self.buffer.advance(pos);
                return None;
            };

            let found = match geometry.classify(word) {
                FrameStart::Frame => true,
                FrameStart::Chunk(seq) => {
                    let end = pos + SEQUENCE_LEN + chunk_len(geometry.size, self.chunk_size, seq);
                    match self.buffer.get(end..end + SEQUENCE_LEN) {
                        Some(next) => !matches!(geometry.classify(next), FrameStart::None),
                        None => {
                            self.buffer.advance(pos);
                            return None;
                        }
                    }
                }
                FrameStart::None => false,
            };

            if found {
                self.buffer.advance(pos);
                self.state = State::Chunks(geometry);
                return self.next_chunk(geometry);
            }
            pos += 1;
        }
    }

    fn next_control(&mut self) -> Option<FrameEvent> {
        if self.buffer.len() < CONTROL_FRAME_LEN {
            return None;
        }

        let frame = self.buffer.split_to(CONTROL_FRAME_LEN);
        let event = match Control::from_tag(&frame[4..]) {
            Some(Control::End) => {
                self.state = State::Idle;
                FrameEvent::End
            }
            Some(Control::Ack) => FrameEvent::Ack,
            Some(Control::Probe) => FrameEvent::Probe,
            Some(Control::ProbeReply) => FrameEvent::ProbeReply,
            None => FrameEvent::Error(DecodeError::UnknownControl {
                tag: [frame[4], frame[5], frame[6]],
            }),
        };
        Some(event)
    }
}

/// `feed`가 돌려주는 이벤트 이터레이터
///
/// 한 번 `None`을 돌려주면 다시 시작하지 않는다.
pub struct Events<'a> {
    decoder: &'a mut FrameDecoder,
    finished: bool,
}

impl Iterator for Events<'_> {
    type Item = FrameEvent;

    fn next(&mut self) -> Option<FrameEvent> {
        if self.finished {
            return None;
        }
        let event = self.decoder.next_event();
        if event.is_none() {
            self.finished = true;
        }
        event
    }
}

impl FusedIterator for Events<'_> {}
