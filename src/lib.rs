//! # loratx
//!
//! 저속 무선 링크(LoRa UART 모듈 등)를 위한 청크 전송 프로토콜
//!
//! ## 핵심 특징
//! - **청크 분할**: 페이로드를 고정 크기 청크로 나누고 시퀀스 번호로 재조립
//! - **전체 ACK**: 전송 한 건에 대해 ACK 하나, 타임아웃 시 전체 재전송
//! - **증분 디코더**: 경계 없는 바이트 스트림에서 헤더/청크/제어 프레임 복원
//! - **무결성 검사**: 헤더에 CRC32 또는 SHA-256 다이제스트 (선택)
//! - **채널 추상화**: 무선 모듈, UDP 에뮬레이터, 메모리 루프백
//! - **설정 스윕**: 전송 사이에 출력/공중 속도를 바꿔 가며 지연 측정
//!
//! ## 선로 형식
//!
//! ```text
//! 헤더:   IDENTIFIER:<name>,SIZE:<bytes>,CHUNKS:<count>[,HASH:<hex>]\n
//! 청크:   [seq: u32 BE][data: chunk_size 또는 마지막 청크의 나머지]
//! 제어:   [FF FF FF FF][END | ACK | PNG | PON]
//! ```

pub mod channel;
pub mod chunk;
pub mod config;
pub mod decoder;
pub mod digest;
pub mod error;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod sweep;

pub use channel::{Channel, LoopbackChannel, RadioSettings, SettingsTable, Sx126xTable, UdpChannel};
pub use chunk::{Chunk, ChunkId, ChunkSplitter, ReassemblyBuffer};
pub use config::Config;
pub use decoder::{DecodeError, FrameDecoder, FrameEvent};
pub use digest::{Digest, DigestKind};
pub use error::{Error, Result};
pub use message::{Control, Header};
pub use receiver::Receiver;
pub use sender::Sender;
pub use session::{Role, Session, TransferResult, TransferStatus};
pub use stats::TransferStats;
pub use sweep::{run_sweep, SweepAxis, SweepRun};

/// 기본 청크 크기 (바이트)
///
/// 시퀀스 번호 4바이트를 더한 청크 프레임이 기본 무선 패킷(240 bytes)에 맞는 값
pub const DEFAULT_CHUNK_SIZE: usize = 236;

/// 최대 청크 크기 (바이트)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024; // 64KB
