//! 송신 엔진
//!
//! - 헤더 → 청크(오름차순, 일정 간격) → 종료 표시 순서로 전송
//! - 전체 전송에 대한 ACK 한 번을 기다림
//! - ACK 타임아웃 시 전송 전체를 다시 보냄 (선택적 청크 재전송 없음)

use bytes::Bytes;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::channel::{write_frame, Channel};
use crate::chunk::{Chunk, ChunkSplitter};
use crate::decoder::{FrameDecoder, FrameEvent};
use crate::message::{encode_end, encode_header, encode_probe_reply, Control, Header};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 송신 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// 수신 측 ACK 확인
    Acknowledged,
    /// ACK를 기다리지 않도록 설정됨
    Unconfirmed,
    /// 모든 시도에서 ACK 타임아웃
    TimedOut,
}

/// 송신 결과
#[derive(Debug)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub header: Header,
    pub stats: TransferStats,
}

/// 송신 엔진
pub struct Sender<'a, C: Channel + ?Sized> {
    channel: &'a mut C,
    config: &'a Config,
    splitter: ChunkSplitter,
    stats: TransferStats,
}

impl<'a, C: Channel + ?Sized> Sender<'a, C> {
    pub fn new(channel: &'a mut C, config: &'a Config) -> Self {
        Self {
            splitter: ChunkSplitter::new(config.chunk_size),
            channel,
            config,
            stats: TransferStats::new(),
        }
    }

    /// 페이로드 전송
    pub async fn send(mut self, payload: Bytes, identifier: &str) -> Result<SendOutcome> {
        if payload.len() > self.config.max_payload_size {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
            });
        }

        let header = Header::new(
            identifier,
            payload.len(),
            self.config.chunk_size,
            self.config.digest.compute(&payload),
        )?;
        let chunks = self.splitter.split(&payload);

        self.discard_stale_input()?;
        info!("전송 시작: {}", header);

        let attempts = self.config.attempts();
        for attempt in 1..=attempts {
            self.stats.attempts = attempt;
            self.transmit(&header, &chunks).await?;

            if !self.config.await_ack {
                debug!("ACK 대기 생략: {}", header.identifier);
                return Ok(self.finish(SendStatus::Unconfirmed, header));
            }

            if self.wait_for_ack().await? {
                info!(
                    "전송 완료: {} ({} 번째 시도, {:.2}s)",
                    header.identifier,
                    attempt,
                    self.stats.elapsed().as_secs_f64()
                );
                return Ok(self.finish(SendStatus::Acknowledged, header));
            }

            if attempt < attempts {
                warn!(
                    "ACK 타임아웃, 전체 재전송 ({}/{}): {}",
                    attempt + 1,
                    attempts,
                    header.identifier
                );
            }
        }

        warn!("전송 실패: {} 시도 모두 ACK 없음", attempts);
        Ok(self.finish(SendStatus::TimedOut, header))
    }

    fn finish(self, status: SendStatus, header: Header) -> SendOutcome {
        SendOutcome {
            status,
            header,
            stats: self.stats,
        }
    }

    /// 이전 전송에서 남은 입력 버림
    fn discard_stale_input(&mut self) -> Result<()> {
        let available = self.channel.bytes_available()?;
        if available > 0 {
            let stale = self.channel.read(available)?;
            debug!("이전 입력 {} bytes 버림", stale.len());
        }
        Ok(())
    }

    /// 한 번의 전체 전송
    async fn transmit(&mut self, header: &Header, chunks: &[Chunk]) -> Result<()> {
        self.write(&encode_header(header))?;
        self.pace().await;

        for chunk in chunks {
            self.write(&chunk.to_bytes())?;
            self.pace().await;
        }

        self.write(&encode_end())?;
        debug!(
            "프레임 전송: 헤더 + {} 청크 + 종료 ({} bytes 누적)",
            chunks.len(),
            self.stats.bytes_sent
        );
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let written = write_frame(self.channel, frame)?;
        self.stats.record_frame(written);
        Ok(())
    }

    /// 전송 간격 (스로틀링)
    async fn pace(&self) {
        if self.config.chunk_interval_ms > 0 {
            sleep(self.config.chunk_interval()).await;
        }
    }

    async fn wait_for_ack(&mut self) -> Result<bool> {
        await_control(
            self.channel,
            self.config,
            Control::Ack,
            self.config.ack_timeout(),
            &mut self.stats,
        )
        .await
    }
}

/// 제어 프레임 하나를 기한까지 폴링하며 기다림
///
/// 기다리는 프레임이 오면 true, 기한이 지나면 false. 그 사이 들어온
/// 연결 테스트 요청에는 응답한다.
pub(crate) async fn await_control<C: Channel + ?Sized>(
    channel: &mut C,
    config: &Config,
    wanted: Control,
    timeout: std::time::Duration,
    stats: &mut TransferStats,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut decoder = FrameDecoder::new(config.chunk_size);

    loop {
        let available = channel.bytes_available()?;
        if available > 0 {
            let data = channel.read(available)?;
            stats.bytes_received += data.len() as u64;

            for event in decoder.feed(&data) {
                match (event, wanted) {
                    (FrameEvent::Ack, Control::Ack) | (FrameEvent::ProbeReply, Control::ProbeReply) => {
                        return Ok(true);
                    }
                    (FrameEvent::Probe, _) => {
                        let written = write_frame(channel, &encode_probe_reply())?;
                        stats.record_frame(written);
                    }
                    (FrameEvent::Error(e), _) => {
                        stats.decode_errors += 1;
                        debug!("{:?} 대기 중 디코딩 에러: {}", wanted, e);
                    }
                    (other, _) => debug!("{:?} 대기 중 무시: {:?}", wanted, other),
                }
            }
        }

        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(config.poll_interval()).await;
    }
}
