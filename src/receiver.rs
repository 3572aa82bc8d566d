//! 수신 엔진
//!
//! - 헤더 대기 → 청크 수신 → 완료/타임아웃 순으로 진행
//! - 청크는 순서와 관계없이 슬롯에 채움, 중복은 덮어씀
//! - 모든 슬롯이 채워지면 다이제스트를 확인하고, 성공했을 때만 ACK 전송
//! - 누락이 남은 채로 종료 표시가 오면 송신 측 전체 재전송을 기다림

use bytes::Bytes;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::channel::{write_frame, Channel};
use crate::chunk::{ChunkId, InsertOutcome, ReassemblyBuffer};
use crate::decoder::{DecodeError, FrameDecoder, FrameEvent};
use crate::message::{encode_ack, encode_probe_reply, Header};
use crate::stats::TransferStats;
use crate::{Config, Result};

/// 수신 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// 모든 청크 수신, 다이제스트 일치 (또는 다이제스트 없음)
    Completed,
    /// 모든 청크 수신, 다이제스트 불일치
    IntegrityFailed,
    /// 헤더 또는 청크 대기 중 타임아웃
    TimedOut,
}

/// 수신 결과
#[derive(Debug)]
pub struct ReceiveOutcome {
    pub status: ReceiveStatus,

    /// 마지막으로 받아들인 헤더 (헤더 없이 끝났으면 None)
    pub header: Option<Header>,

    /// 재조립된 페이로드
    /// 타임아웃이면 누락 구간이 0으로 채워진 부분 데이터
    pub payload: Bytes,

    /// 누락된 청크 ID
    pub missing: Vec<ChunkId>,

    pub stats: TransferStats,
}

/// 수신 진행 단계
enum Phase {
    AwaitingHeader,
    ReceivingChunks(ReassemblyBuffer),
}

/// 수신 내부 상태 (단일 태스크에서만 접근)
struct ReceiverInner<'a> {
    config: &'a Config,
    phase: Phase,
    stats: TransferStats,
    end_seen: bool,
}

impl<'a> ReceiverInner<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            phase: Phase::AwaitingHeader,
            stats: TransferStats::new(),
            end_seen: false,
        }
    }

    /// 이벤트 하나 처리, 모든 슬롯이 채워졌으면 true
    fn handle_event<C: Channel + ?Sized>(&mut self, channel: &mut C, event: FrameEvent) -> Result<bool> {
        match event {
            FrameEvent::Header(header) => Ok(self.handle_header(header)),
            FrameEvent::Chunk(chunk) => {
                let Phase::ReceivingChunks(buffer) = &mut self.phase else {
                    debug!("헤더 전 청크 무시: seq={}", chunk.seq);
                    return Ok(false);
                };

                self.stats.chunks_received += 1;
                match buffer.insert(chunk.seq, chunk.data) {
                    InsertOutcome::Filled => {}
                    InsertOutcome::Duplicate => self.stats.duplicate_chunks += 1,
                    InsertOutcome::OutOfRange => self.stats.out_of_range_chunks += 1,
                }
                Ok(buffer.is_complete())
            }
            FrameEvent::End => {
                if let Phase::ReceivingChunks(buffer) = &self.phase {
                    self.end_seen = true;
                    warn!(
                        "종료 표시 수신, {} 청크 누락: 재전송 대기 ({})",
                        buffer.missing_chunk_ids().len(),
                        buffer.header().identifier
                    );
                }
                Ok(false)
            }
            FrameEvent::Probe => {
                debug!("연결 테스트 요청 응답");
                let written = write_frame(channel, &encode_probe_reply())?;
                self.stats.record_frame(written);
                Ok(false)
            }
            FrameEvent::Ack | FrameEvent::ProbeReply => {
                debug!("수신 측에서 의미 없는 제어 프레임 무시: {:?}", event);
                Ok(false)
            }
            FrameEvent::Error(DecodeError::SequenceOutOfRange { seq, chunk_count }) => {
                self.stats.out_of_range_chunks += 1;
                debug!("범위 밖 시퀀스 버림: {} (청크 수 {})", seq, chunk_count);
                Ok(false)
            }
            FrameEvent::Error(DecodeError::PayloadTooLarge { size, max }) => {
                self.stats.decode_errors += 1;
                warn!("허용 크기 초과 헤더 무시: {} bytes > {} bytes", size, max);
                Ok(false)
            }
            FrameEvent::Error(e) => {
                self.stats.decode_errors += 1;
                warn!("디코딩 에러: {}", e);
                Ok(false)
            }
        }
    }

    fn handle_header(&mut self, header: Header) -> bool {
        self.stats.headers_received += 1;

        if let Phase::ReceivingChunks(buffer) = &self.phase {
            if buffer.header().same_transfer(&header) {
                debug!("재전송 헤더 수신, 버퍼 유지: {}", header.identifier);
                self.end_seen = false;
                return false;
            }
            warn!(
                "다른 전송의 헤더 수신, 버퍼 교체: {} -> {}",
                buffer.header().identifier,
                header.identifier
            );
        }

        info!("헤더 수신: {}", header);
        let buffer = ReassemblyBuffer::new(header, self.config.chunk_size);
        // 빈 페이로드는 헤더만으로 완료
        let complete = buffer.is_complete();
        self.phase = Phase::ReceivingChunks(buffer);
        self.end_seen = false;
        complete
    }

    /// 버퍼 검증 후 결과 생성
    fn complete<C: Channel + ?Sized>(self, channel: &mut C) -> Result<ReceiveOutcome> {
        let Phase::ReceivingChunks(buffer) = self.phase else {
            return Ok(Self::empty_outcome(ReceiveStatus::TimedOut, self.stats));
        };

        let payload = buffer.assemble();
        let header = buffer.header().clone();
        let mut stats = self.stats;

        let verified = header.digest.map_or(true, |digest| digest.verify(&payload));
        let status = if verified {
            let written = write_frame(channel, &encode_ack())?;
            stats.record_frame(written);
            info!(
                "수신 완료: {} ({} bytes, {:.2}s, 중복 {} 청크)",
                header.identifier,
                payload.len(),
                buffer.created_at.elapsed().as_secs_f64(),
                stats.duplicate_chunks
            );
            ReceiveStatus::Completed
        } else {
            warn!("무결성 검사 실패, ACK 보내지 않음: {}", header.identifier);
            ReceiveStatus::IntegrityFailed
        };

        Ok(ReceiveOutcome {
            status,
            header: Some(header),
            payload,
            missing: Vec::new(),
            stats,
        })
    }

    /// 타임아웃 결과 (받은 만큼만)
    fn timed_out(self) -> ReceiveOutcome {
        match self.phase {
            Phase::AwaitingHeader => {
                warn!("헤더 대기 타임아웃");
                Self::empty_outcome(ReceiveStatus::TimedOut, self.stats)
            }
            Phase::ReceivingChunks(buffer) => {
                let missing = buffer.missing_chunk_ids();
                warn!(
                    "청크 대기 타임아웃: {} ({}/{} 청크, 누락 {}{})",
                    buffer.header().identifier,
                    buffer.filled_count(),
                    buffer.header().chunk_count,
                    missing.len(),
                    if self.end_seen { ", 종료 표시 수신함" } else { "" }
                );
                ReceiveOutcome {
                    status: ReceiveStatus::TimedOut,
                    header: Some(buffer.header().clone()),
                    payload: buffer.assemble(),
                    missing,
                    stats: self.stats,
                }
            }
        }
    }

    fn empty_outcome(status: ReceiveStatus, stats: TransferStats) -> ReceiveOutcome {
        ReceiveOutcome {
            status,
            header: None,
            payload: Bytes::new(),
            missing: Vec::new(),
            stats,
        }
    }
}

/// 수신 엔진
pub struct Receiver<'a, C: Channel + ?Sized> {
    channel: &'a mut C,
    decoder: FrameDecoder,
    inner: ReceiverInner<'a>,
}

impl<'a, C: Channel + ?Sized> Receiver<'a, C> {
    pub fn new(channel: &'a mut C, config: &'a Config) -> Self {
        Self {
            channel,
            decoder: FrameDecoder::new(config.chunk_size).with_max_payload(config.max_payload_size),
            inner: ReceiverInner::new(config),
        }
    }

    /// 전송 한 건 수신
    ///
    /// 헤더 대기, 청크 사이 무응답, 전송 전체 예산 세 가지 타임아웃은
    /// 받은 만큼의 데이터와 함께 결과로 보고하고, 채널 에러만 `Err`로
    /// 돌려준다.
    pub async fn receive(mut self) -> Result<ReceiveOutcome> {
        let config = self.inner.config;
        let started = Instant::now();
        let header_deadline = started + config.header_timeout();
        let overall_deadline = started + config.transfer_timeout();
        let mut last_activity = started;

        info!("헤더 대기 중 (최대 {:.0}s)", config.header_timeout().as_secs_f64());

        loop {
            let available = self.channel.bytes_available()?;
            if available > 0 {
                let data = self.channel.read(available)?;
                last_activity = Instant::now();
                self.inner.stats.bytes_received += data.len() as u64;

                let mut complete = false;
                for event in self.decoder.feed(&data) {
                    if self.inner.handle_event(&mut *self.channel, event)? {
                        complete = true;
                        break;
                    }
                }
                if complete {
                    return self.inner.complete(self.channel);
                }
            }

            let now = Instant::now();
            if now >= overall_deadline {
                warn!("전송 전체 시간 초과: {:.1}s", config.transfer_timeout().as_secs_f64());
                return Ok(self.inner.timed_out());
            }
            let expired = match self.inner.phase {
                Phase::AwaitingHeader => now >= header_deadline,
                Phase::ReceivingChunks(_) => now.duration_since(last_activity) >= config.idle_timeout(),
            };
            if expired {
                return Ok(self.inner.timed_out());
            }

            if available == 0 {
                sleep(config.poll_interval()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannel;
    use crate::chunk::ChunkSplitter;
    use crate::digest::DigestKind;
    use crate::message::{encode_chunk, encode_end, encode_header};

    fn test_config() -> Config {
        Config {
            chunk_interval_ms: 0,
            header_timeout_ms: 1_000,
            idle_timeout_ms: 500,
            ..Config::default()
        }
    }

    fn transfer_frames(payload: &[u8], identifier: &str, config: &Config) -> Vec<Vec<u8>> {
        let payload = Bytes::copy_from_slice(payload);
        let header = Header::new(
            identifier,
            payload.len(),
            config.chunk_size,
            config.digest.compute(&payload),
        )
        .unwrap();

        let mut frames = vec![encode_header(&header)];
        frames.extend(
            ChunkSplitter::new(config.chunk_size)
                .split(&payload)
                .iter()
                .map(|c| c.to_bytes()),
        );
        frames.push(encode_end().to_vec());
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn test_receives_injected_transfer() {
        let (mut rx, mut tx) = LoopbackChannel::pair();
        let config = test_config();
        let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();

        for frame in transfer_frames(&payload, "a.bin", &config) {
            rx.inject(&frame);
        }

        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::Completed);
        assert_eq!(outcome.payload.as_ref(), payload.as_slice());
        assert_eq!(outcome.header.unwrap().chunk_count, 3);
        assert_eq!(tx.read(usize::MAX).unwrap().as_ref(), &encode_ack());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_and_duplicates() {
        let (mut rx, _tx) = LoopbackChannel::pair();
        let config = test_config();
        let payload = vec![0xABu8; 700];

        let frames = transfer_frames(&payload, "o", &config);
        // 헤더, 청크 2, 청크 0, 청크 0, 청크 1
        rx.inject(&frames[0]);
        rx.inject(&frames[3]);
        rx.inject(&frames[1]);
        rx.inject(&frames[1]);
        rx.inject(&frames[2]);

        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::Completed);
        assert_eq!(outcome.payload.len(), 700);
        assert_eq!(outcome.stats.duplicate_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_timeout() {
        let (mut rx, _tx) = LoopbackChannel::pair();
        let config = test_config();

        let started = Instant::now();
        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert!(outcome.header.is_none());
        assert!(outcome.payload.is_empty());
        assert!(elapsed >= config.header_timeout());
        assert!(elapsed <= config.header_timeout() + config.poll_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_chunk_after_end_times_out_with_partial_payload() {
        let (mut rx, mut tx) = LoopbackChannel::pair();
        let config = test_config();
        let payload = vec![0x55u8; 600];

        let frames = transfer_frames(&payload, "b", &config);
        for (i, frame) in frames.iter().enumerate() {
            if i != 2 {
                rx.inject(frame);
            }
        }

        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert_eq!(outcome.missing, vec![1]);
        assert_eq!(outcome.payload.len(), 600);
        let size = config.chunk_size;
        assert!(outcome.payload[size..2 * size].iter().all(|&b| b == 0));
        assert!(outcome.payload[..size].iter().all(|&b| b == 0x55));
        assert_eq!(tx.bytes_available().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digest_mismatch_sends_no_ack() {
        let (mut rx, mut tx) = LoopbackChannel::pair();
        let config = Config {
            digest: DigestKind::Sha256,
            ..test_config()
        };
        let payload = vec![1u8; 300];

        let mut frames = transfer_frames(&payload, "c", &config);
        // 첫 청크의 데이터 한 바이트 변조
        frames[1][10] ^= 0xFF;
        for frame in &frames {
            rx.inject(frame);
        }

        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::IntegrityFailed);
        assert_eq!(outcome.payload.len(), 300);
        assert_eq!(tx.bytes_available().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_completes_on_header() {
        let (mut rx, _tx) = LoopbackChannel::pair();
        let config = test_config();

        rx.inject(&transfer_frames(b"", "empty", &config)[0]);
        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::Completed);
        assert!(outcome.payload.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_header_ignored() {
        let (mut rx, _tx) = LoopbackChannel::pair();
        let config = Config {
            max_payload_size: 100,
            ..test_config()
        };

        for frame in transfer_frames(&[9u8; 300], "big", &Config::default()) {
            rx.inject(&frame);
        }
        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert!(outcome.header.is_none());
        assert_eq!(outcome.stats.headers_received, 0);
        assert!(outcome.stats.decode_errors >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_header_does_not_feed_current_buffer() {
        let (mut rx, mut tx) = LoopbackChannel::pair();
        let config = Config {
            max_payload_size: 1_000,
            ..test_config()
        };
        let payload = vec![0x11u8; 600];
        let frames = transfer_frames(&payload, "a", &config);

        // 전송 a의 헤더와 청크 0, 이어서 크기 초과 전송의 헤더와 청크 1, 2
        rx.inject(&frames[0]);
        rx.inject(&frames[1]);
        let big = Header::new("big", 2_000, config.chunk_size, None).unwrap();
        rx.inject(&encode_header(&big));
        rx.inject(&encode_chunk(1, &vec![0xEE; config.chunk_size]));
        rx.inject(&encode_chunk(2, &vec![0xEE; config.chunk_size]));
        rx.inject(&encode_end());

        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert_eq!(outcome.header.unwrap().identifier, "a");
        assert_eq!(outcome.missing, vec![1, 2]);
        assert!(!outcome.payload.contains(&0xEE));
        assert_eq!(tx.bytes_available().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_budget_returns_partial_data() {
        let (mut rx, _tx) = LoopbackChannel::pair();
        let config = Config {
            idle_timeout_ms: 60_000,
            transfer_timeout_ms: 3_000,
            ..test_config()
        };
        let payload = vec![0x42u8; 600];
        let frames = transfer_frames(&payload, "slow", &config);
        rx.inject(&frames[0]);
        rx.inject(&frames[1]);
        rx.inject(&frames[2]);

        let started = Instant::now();
        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();

        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert_eq!(outcome.header.unwrap().identifier, "slow");
        assert_eq!(outcome.missing, vec![2]);
        assert_eq!(outcome.payload.len(), 600);
        assert!(started.elapsed() >= config.transfer_timeout());
        assert!(started.elapsed() < config.idle_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_probe_while_waiting() {
        let (mut rx, mut tx) = LoopbackChannel::pair();
        let config = test_config();

        rx.inject(&crate::message::encode_probe());
        let outcome = Receiver::new(&mut rx, &config).receive().await.unwrap();
        assert_eq!(outcome.status, ReceiveStatus::TimedOut);
        assert_eq!(tx.read(usize::MAX).unwrap().as_ref(), &encode_probe_reply());
    }
}
