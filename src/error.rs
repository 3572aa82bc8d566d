//! 에러 타입 정의

use thiserror::Error;

/// loratx 에러 타입
///
/// 채널 I/O 실패처럼 전송을 즉시 중단시키는 에러와, 전송을 시작하기 전에
/// 걸러지는 입력/설정 에러만 담는다. 디코딩 에러는 [`crate::decoder::DecodeError`]
/// 로 따로 보고되며 세션을 끝내지 않는다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("채널 I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("채널이 닫힘: 쓰기가 0 바이트를 받아들임")]
    ChannelClosed,

    #[error("유효하지 않은 식별자: {identifier:?}")]
    InvalidIdentifier { identifier: String },

    #[error("유효하지 않은 청크 크기: {chunk_size} (허용 범위 1..={max})")]
    InvalidChunkSize { chunk_size: usize, max: usize },

    #[error("페이로드가 너무 큼: {size} bytes")]
    PayloadTooLarge { size: usize },

    #[error("지원하지 않는 무선 설정: {field}={value}")]
    InvalidSetting { field: &'static str, value: String },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 채널 장애 여부 (전송 도중 중단되는 에러)
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ChannelClosed)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
