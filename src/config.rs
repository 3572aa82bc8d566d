//! 전송 설정
//!
//! 흩어져 있던 타임아웃/재시도 상수를 한곳에 모은다. 세션 생성 시 한 번
//! 넘겨받고, 전송 중에는 바뀌지 않는다.

use std::time::Duration;

use crate::digest::DigestKind;
use crate::{Error, Result, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// 전송 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    /// 송신/수신 양쪽이 같은 값을 써야 함
    pub chunk_size: usize,

    /// 프레임 사이 전송 간격 (밀리초)
    /// 채널 처리량을 넘지 않기 위한 스로틀링
    pub chunk_interval_ms: u64,

    /// ACK 대기 여부
    pub await_ack: bool,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 전체 재전송 횟수 (1이면 최대 2회 시도)
    pub max_retries: u32,

    /// 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,

    /// 헤더 대기 타임아웃 (밀리초)
    pub header_timeout_ms: u64,

    /// 청크 수신 중 무응답 타임아웃 (밀리초)
    pub idle_timeout_ms: u64,

    /// 전송 한 건의 전체 예산 (밀리초)
    pub transfer_timeout_ms: u64,

    /// 연결 테스트 응답 대기 (밀리초)
    pub probe_timeout_ms: u64,

    /// 송신 시 헤더에 실을 다이제스트
    pub digest: DigestKind,

    /// 받아들일 최대 페이로드 크기 (바이트)
    /// 이보다 큰 SIZE를 가진 헤더는 무시
    pub max_payload_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_interval_ms: 100,
            await_ack: true,
            ack_timeout_ms: 5_000,         // 5초
            max_retries: 1,
            poll_interval_ms: 100,
            header_timeout_ms: 120_000,    // 2분
            idle_timeout_ms: 10_000,       // 10초, ACK 타임아웃보다 길어야 재전송을 받아냄
            transfer_timeout_ms: 600_000,  // 10분
            probe_timeout_ms: 15_000,
            digest: DigestKind::Crc32,
            max_payload_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 장거리/저속 링크용 설정 (SF 높음, 1200bps 수준)
    pub fn long_range() -> Self {
        Self {
            chunk_size: 128,
            chunk_interval_ms: 400,
            ack_timeout_ms: 15_000,
            max_retries: 2,
            poll_interval_ms: 200,
            header_timeout_ms: 300_000,
            idle_timeout_ms: 30_000,
            transfer_timeout_ms: 1_800_000,
            probe_timeout_ms: 30_000,
            ..Self::default()
        }
    }

    /// 근거리/고속 링크용 설정
    pub fn short_range() -> Self {
        Self {
            chunk_interval_ms: 20,
            ack_timeout_ms: 2_000,
            poll_interval_ms: 20,
            header_timeout_ms: 30_000,
            idle_timeout_ms: 4_000,
            transfer_timeout_ms: 120_000,
            probe_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    /// 설정값 검증
    ///
    /// 0 타임아웃처럼 전송이 성립할 수 없는 값을 거른다.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidChunkSize {
                chunk_size: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        if self.await_ack && self.ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("ack_timeout_ms must be > 0".into()));
        }
        if self.header_timeout_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "header_timeout_ms and idle_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(Error::InvalidConfig("max_payload_size must be > 0".into()));
        }
        if self.transfer_timeout_ms == 0 {
            return Err(Error::InvalidConfig("transfer_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// 최대 시도 횟수
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 236);
        assert_eq!(config.attempts(), 2);
        assert_eq!(config.ack_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(Config::long_range().validate().is_ok());
        assert!(Config::short_range().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidChunkSize { chunk_size: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
