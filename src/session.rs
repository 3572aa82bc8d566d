//! 전송 세션 (컨트롤러)
//!
//! 채널 하나와 설정을 묶어 송신/수신 역할을 실행한다. 무선 설정은
//! 세션을 열 때와 전송 사이에만 적용되고, 전송 중에는 바뀌지 않는다.
//!
//! 엔진 결과는 [`TransferResult`] 하나로 모인다. 채널 장애도 `Err`가 아닌
//! [`TransferStatus::ChannelError`]로 보고된다.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use crate::channel::{write_frame, Channel, RadioSettings};
use crate::chunk::ChunkId;
use crate::message::{encode_probe, Control, SEQUENCE_LEN};
use crate::receiver::{ReceiveStatus, Receiver};
use crate::sender::{await_control, SendStatus, Sender};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 세션 역할
#[derive(Debug, Clone)]
pub enum Role {
    Sender { payload: Bytes, identifier: String },
    Receiver,
}

/// 전송 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    TimedOut,
    IntegrityFailed,
    ChannelError,
}

/// 전송 한 건의 결과
#[derive(Debug)]
pub struct TransferResult {
    pub status: TransferStatus,

    /// 전송 식별자 (헤더를 받지 못했으면 None)
    pub identifier: Option<String>,

    /// 수신 페이로드 (송신 측은 None)
    ///
    /// IntegrityFailed면 검증에 실패한 데이터, TimedOut이면 누락 구간이
    /// 0으로 채워진 부분 데이터.
    pub payload: Option<Bytes>,

    /// 누락된 청크 ID (수신 타임아웃일 때만)
    pub missing: Vec<ChunkId>,

    /// 경과 시간
    pub elapsed: Duration,

    pub stats: TransferStats,

    /// ChannelError의 원인
    pub error: Option<Error>,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }

    fn new(status: TransferStatus, elapsed: Duration) -> Self {
        Self {
            status,
            identifier: None,
            payload: None,
            missing: Vec::new(),
            elapsed,
            stats: TransferStats::new(),
            error: None,
        }
    }

    fn channel_error(err: Error, elapsed: Duration) -> Self {
        error!("채널 에러로 전송 중단: {}", err);
        Self {
            error: Some(err),
            ..Self::new(TransferStatus::ChannelError, elapsed)
        }
    }

    fn overall_timeout(budget: Duration, elapsed: Duration) -> Self {
        warn!("전송 전체 시간 초과: {:.1}s", budget.as_secs_f64());
        Self::new(TransferStatus::TimedOut, elapsed)
    }
}

/// 청크 프레임이 채널 쓰기 한 번과 무선 패킷 하나에 들어가는지 확인
fn check_chunk_fits<C: Channel>(channel: &C, config: &Config, radio: &RadioSettings) -> Result<()> {
    let frame_limit = channel.max_write_size().min(radio.max_frame_size);
    let max_chunk = frame_limit.saturating_sub(SEQUENCE_LEN);
    if config.chunk_size > max_chunk {
        return Err(Error::InvalidChunkSize {
            chunk_size: config.chunk_size,
            max: max_chunk,
        });
    }
    Ok(())
}

/// 전송 세션
pub struct Session<C: Channel> {
    channel: C,
    config: Config,
    radio: RadioSettings,
}

impl<C: Channel> Session<C> {
    /// 세션 열기
    ///
    /// 설정을 검증하고, 청크 프레임이 채널 쓰기 한 번과 무선 패킷 하나에
    /// 들어가는지 확인한 뒤 무선 설정을 적용한다.
    pub fn open(mut channel: C, config: Config, radio: RadioSettings) -> Result<Self> {
        config.validate()?;
        check_chunk_fits(&channel, &config, &radio)?;

        channel.configure(&radio)?;
        info!(
            "세션 열림: chunk_size={}, address={}, power={}dBm, air_speed={}bps",
            config.chunk_size, radio.address, radio.power_dbm, radio.air_speed
        );

        Ok(Self {
            channel,
            config,
            radio,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 현재 무선 설정
    pub fn radio(&self) -> &RadioSettings {
        &self.radio
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// 전송 사이에 무선 설정 변경
    ///
    /// 패킷 크기가 청크 프레임보다 작거나 채널이 거부하면 이전 설정이
    /// 그대로 유지된다.
    pub fn reconfigure(&mut self, radio: RadioSettings) -> Result<()> {
        check_chunk_fits(&self.channel, &self.config, &radio)?;
        self.channel.configure(&radio)?;
        info!(
            "무선 설정 변경: power={}dBm, air_speed={}bps, max_frame_size={}",
            radio.power_dbm, radio.air_speed, radio.max_frame_size
        );
        self.radio = radio;
        Ok(())
    }

    /// 역할 실행
    pub async fn run(&mut self, role: Role) -> Result<TransferResult> {
        match role {
            Role::Sender {
                payload,
                identifier,
            } => self.send(payload, &identifier).await,
            Role::Receiver => Ok(self.receive().await),
        }
    }

    /// 페이로드 송신
    ///
    /// 식별자나 크기가 잘못되면 아무것도 보내지 않고 `Err`를 돌려준다.
    pub async fn send(&mut self, payload: impl Into<Bytes>, identifier: &str) -> Result<TransferResult> {
        let payload = payload.into();
        let started = Instant::now();
        let budget = self.config.transfer_timeout();

        let engine = Sender::new(&mut self.channel, &self.config);
        let outcome = match timeout(budget, engine.send(payload, identifier)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_channel_error() => {
                return Ok(TransferResult::channel_error(e, started.elapsed()));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(TransferResult::overall_timeout(budget, started.elapsed())),
        };

        let status = match outcome.status {
            SendStatus::Acknowledged | SendStatus::Unconfirmed => TransferStatus::Success,
            SendStatus::TimedOut => TransferStatus::TimedOut,
        };

        Ok(TransferResult {
            status,
            identifier: Some(outcome.header.identifier),
            payload: None,
            missing: Vec::new(),
            elapsed: started.elapsed(),
            stats: outcome.stats,
            error: None,
        })
    }

    /// 전송 한 건 수신
    ///
    /// 전체 예산은 수신 엔진이 직접 지키므로 시간 초과에도 받은 만큼의
    /// 데이터가 결과에 남는다.
    pub async fn receive(&mut self) -> TransferResult {
        let started = Instant::now();

        let engine = Receiver::new(&mut self.channel, &self.config);
        let outcome = match engine.receive().await {
            Ok(outcome) => outcome,
            Err(e) => return TransferResult::channel_error(e, started.elapsed()),
        };

        let status = match outcome.status {
            ReceiveStatus::Completed => TransferStatus::Success,
            ReceiveStatus::IntegrityFailed => TransferStatus::IntegrityFailed,
            ReceiveStatus::TimedOut => TransferStatus::TimedOut,
        };

        TransferResult {
            status,
            identifier: outcome.header.map(|h| h.identifier),
            payload: Some(outcome.payload),
            missing: outcome.missing,
            elapsed: started.elapsed(),
            stats: outcome.stats,
            error: None,
        }
    }

    /// 연결 테스트
    ///
    /// 요청을 보내고 응답까지 걸린 시간을 돌려준다. 응답이 없으면 None.
    pub async fn probe(&mut self) -> Result<Option<Duration>> {
        let mut stats = TransferStats::new();
        let started = Instant::now();

        let written = write_frame(&mut self.channel, &encode_probe())?;
        stats.record_frame(written);

        let replied = await_control(
            &mut self.channel,
            &self.config,
            Control::ProbeReply,
            self.config.probe_timeout(),
            &mut stats,
        )
        .await?;

        if replied {
            let rtt = started.elapsed();
            info!("연결 테스트 응답: {:.0}ms", rtt.as_secs_f64() * 1000.0);
            Ok(Some(rtt))
        } else {
            warn!("연결 테스트 응답 없음 ({:.0}s)", self.config.probe_timeout().as_secs_f64());
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{LoopbackChannel, Sx126xTable};
    use crate::chunk::ChunkSplitter;
    use crate::message::{encode_header, Header};

    fn fast_config() -> Config {
        Config {
            chunk_interval_ms: 0,
            ..Config::default()
        }
    }

    #[test]
    fn test_open_rejects_chunk_larger_than_write() {
        let (a, _b) = LoopbackChannel::pair();
        let a = a.with_max_write_size(100);
        let result = Session::open(a, Config::default(), RadioSettings::default());
        assert!(matches!(
            result,
            Err(Error::InvalidChunkSize { chunk_size: 236, max: 96 })
        ));
    }

    #[test]
    fn test_open_rejects_chunk_larger_than_radio_packet() {
        let (a, _b) = LoopbackChannel::pair();
        let config = Config {
            chunk_size: 240,
            ..Config::default()
        };
        let result = Session::open(a, config, RadioSettings::default());
        assert!(matches!(
            result,
            Err(Error::InvalidChunkSize { chunk_size: 240, max: 236 })
        ));
    }

    #[test]
    fn test_reconfigure_rejects_smaller_packet() {
        let (a, _b) = LoopbackChannel::pair();
        let mut session = Session::open(a, Config::default(), RadioSettings::default()).unwrap();

        let small = RadioSettings {
            max_frame_size: 32,
            ..RadioSettings::default()
        };
        assert!(matches!(
            session.reconfigure(small),
            Err(Error::InvalidChunkSize { max: 28, .. })
        ));
        assert_eq!(session.radio(), &RadioSettings::default());
        assert_eq!(session.channel().applied_settings(), &[RadioSettings::default()]);
    }

    #[test]
    fn test_open_applies_radio_settings() {
        let (a, _b) = LoopbackChannel::pair();
        let session = Session::open(a, Config::default(), RadioSettings::default()).unwrap();
        assert_eq!(session.channel().applied_settings(), &[RadioSettings::default()]);
    }

    #[test]
    fn test_rejected_reconfigure_keeps_previous_settings() {
        let (a, _b) = LoopbackChannel::pair();
        let mut session =
            Session::open(a.with_table(Sx126xTable), Config::default(), RadioSettings::default())
                .unwrap();

        let bad = RadioSettings {
            power_dbm: 99,
            ..RadioSettings::default()
        };
        assert!(matches!(
            session.reconfigure(bad),
            Err(Error::InvalidSetting { field: "power_dbm", .. })
        ));
        assert_eq!(session.radio(), &RadioSettings::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_invalid_identifier_is_err() {
        let (a, _b) = LoopbackChannel::pair();
        let mut session = Session::open(a, fast_config(), RadioSettings::default()).unwrap();
        let result = session.send(Bytes::from_static(b"x"), "").await;
        assert!(matches!(result, Err(Error::InvalidIdentifier { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_reports_channel_error() {
        let (a, _b) = LoopbackChannel::pair();
        let mut session = Session::open(a, fast_config(), RadioSettings::default()).unwrap();
        session.channel().close();

        let result = session.receive().await;
        assert_eq!(result.status, TransferStatus::ChannelError);
        assert!(result.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_cuts_long_receive() {
        let (a, _b) = LoopbackChannel::pair();
        let config = Config {
            transfer_timeout_ms: 2_000,
            ..fast_config()
        };
        let mut session = Session::open(a, config, RadioSettings::default()).unwrap();

        let result = session.receive().await;
        assert_eq!(result.status, TransferStatus::TimedOut);
        assert!(result.identifier.is_none());
        assert!(result.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_keeps_partial_data() {
        let (a, _b) = LoopbackChannel::pair();
        let config = Config {
            transfer_timeout_ms: 3_000,
            ..fast_config()
        };

        let payload = Bytes::from(vec![7u8; 600]);
        let header = Header::new("partial", 600, config.chunk_size, None).unwrap();
        a.inject(&encode_header(&header));
        for chunk in ChunkSplitter::new(config.chunk_size).split(&payload).iter().take(2) {
            a.inject(&chunk.to_bytes());
        }

        let mut session = Session::open(a, config, RadioSettings::default()).unwrap();
        let result = session.receive().await;

        assert_eq!(result.status, TransferStatus::TimedOut);
        assert_eq!(result.identifier.as_deref(), Some("partial"));
        assert_eq!(result.missing, vec![2]);

        let partial = result.payload.unwrap();
        assert_eq!(partial.len(), 600);
        assert!(partial[..2 * session.config().chunk_size].iter().all(|&b| b == 7));
        assert!(result.elapsed < session.config().idle_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_without_peer() {
        let (a, _b) = LoopbackChannel::pair();
        let mut session = Session::open(a, fast_config(), RadioSettings::default()).unwrap();
        assert_eq!(session.probe().await.unwrap(), None);
    }
}
