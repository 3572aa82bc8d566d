//! 채널 어댑터
//!
//! 물리 전송로(무선 모듈의 시리얼 포트 등)를 바이트 쓰기/가용 바이트 확인/
//! 읽기 세 가지 동작으로만 다룬다. 프레이밍은 없고, 쓰기는 유실되거나
//! 순서가 바뀔 수 있다.
//!
//! 모듈별 설정 값 표(출력, 주소 인코딩 등)는 프로토콜 엔진에 두지 않고
//! [`SettingsTable`]로 어댑터에 주입한다.

mod loopback;
mod sx126x;
mod udp;

pub use loopback::LoopbackChannel;
pub use sx126x::Sx126xTable;
pub use udp::UdpChannel;

use std::io;

use bytes::Bytes;

use crate::{Error, Result};

/// 어댑터 기본 최대 쓰기 크기
pub const DEFAULT_MAX_WRITE_SIZE: usize = 512;

/// 양방향 바이트 채널
///
/// 모든 동작은 블로킹하지 않는다. 대기는 호출 측 폴링 루프가 맡는다.
pub trait Channel {
    /// 바이트 쓰기, 실제로 받아들인 바이트 수 반환
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// 지금 읽을 수 있는 바이트 수
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// 최대 `n` 바이트 읽기
    fn read(&mut self, n: usize) -> io::Result<Bytes>;

    /// 한 번의 쓰기로 보낼 수 있는 최대 바이트 수
    fn max_write_size(&self) -> usize;

    /// 무선 설정 적용 (전송과 전송 사이에만 호출됨)
    fn configure(&mut self, settings: &RadioSettings) -> Result<()>;
}

/// 프레임 하나를 끝까지 쓴다
///
/// 최대 쓰기 크기보다 긴 프레임은 나눠서 쓰고, 부분 쓰기는 남은 부분을
/// 이어서 쓴다. 0 바이트 쓰기는 채널이 닫힌 것으로 본다.
pub fn write_frame<C: Channel + ?Sized>(channel: &mut C, frame: &[u8]) -> Result<usize> {
    let max = channel.max_write_size().max(1);
    let mut offset = 0;

    while offset < frame.len() {
        let end = (offset + max).min(frame.len());
        let written = channel.write(&frame[offset..end])?;
        if written == 0 {
            return Err(Error::ChannelClosed);
        }
        offset += written;
    }

    Ok(offset)
}

/// 무선 모듈 설정
///
/// 프로토콜 엔진은 값을 해석하지 않고 어댑터에 그대로 넘긴다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioSettings {
    /// 모듈 주소
    pub address: u16,

    /// 네트워크 ID
    pub network_id: u8,

    /// 중심 주파수 (MHz)
    pub frequency_mhz: u16,

    /// 송신 출력 (dBm)
    pub power_dbm: u8,

    /// 공중 전송 속도 (bps)
    pub air_speed: u32,

    /// 확산 계수 (5..=12), 모듈이 직접 노출할 때만
    pub spreading_factor: Option<u8>,

    /// 부호율 분모 (5..=8, 4/5..4/8)
    pub coding_rate: Option<u8>,

    /// 무선 패킷 크기
    pub max_frame_size: usize,

    /// 모듈 암호화 키 (0이면 끔), 값은 해석하지 않음
    pub crypt_key: u16,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            address: 36,
            network_id: 0,
            frequency_mhz: 915,
            power_dbm: 22,
            air_speed: 2400,
            spreading_factor: None,
            coding_rate: None,
            max_frame_size: 240,
            crypt_key: 0,
        }
    }
}

/// 모듈별 설정 검증/인코딩 표
pub trait SettingsTable: Send {
    /// 설정을 검증하고 모듈 설정 명령 바이트로 변환
    fn encode(&self, settings: &RadioSettings) -> Result<Vec<u8>>;
}
