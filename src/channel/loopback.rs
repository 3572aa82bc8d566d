//! 메모리 내 루프백 채널
//!
//! 두 끝점이 버퍼 두 개를 나눠 가진다. 쓰기 필터로 유실을 흉내 낼 수 있다.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::channel::{Channel, RadioSettings, SettingsTable, DEFAULT_MAX_WRITE_SIZE};
use crate::Result;

/// 쓰기 필터: false를 돌려주면 그 쓰기는 전달되지 않음
type WriteFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// 루프백 채널 끝점
pub struct LoopbackChannel {
    rx: Arc<Mutex<BytesMut>>,
    tx: Arc<Mutex<BytesMut>>,
    closed: Arc<AtomicBool>,
    max_write: usize,
    filter: Option<WriteFilter>,
    table: Option<Box<dyn SettingsTable>>,
    applied: Vec<RadioSettings>,
    writes: usize,
    dropped: usize,
}

impl LoopbackChannel {
    /// 서로 연결된 두 끝점 생성
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(BytesMut::new()));
        let b_to_a = Arc::new(Mutex::new(BytesMut::new()));
        let closed = Arc::new(AtomicBool::new(false));

        (
            Self::endpoint(b_to_a.clone(), a_to_b.clone(), closed.clone()),
            Self::endpoint(a_to_b, b_to_a, closed),
        )
    }

    fn endpoint(rx: Arc<Mutex<BytesMut>>, tx: Arc<Mutex<BytesMut>>, closed: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            tx,
            closed,
            max_write: DEFAULT_MAX_WRITE_SIZE,
            filter: None,
            table: None,
            applied: Vec::new(),
            writes: 0,
            dropped: 0,
        }
    }

    pub fn with_max_write_size(mut self, max_write: usize) -> Self {
        self.max_write = max_write;
        self
    }

    /// 쓰기마다 호출되는 필터 설정
    pub fn with_write_filter(mut self, filter: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// 고정 시드로 `rate` 비율만큼 쓰기를 유실
    pub fn with_loss(self, rate: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.with_write_filter(move |_| !rng.gen_bool(rate))
    }

    /// 설정 검증 표 주입
    pub fn with_table(mut self, table: impl SettingsTable + 'static) -> Self {
        self.table = Some(Box::new(table));
        self
    }

    /// 상대방이 보낸 것처럼 수신 버퍼에 바이트 추가
    pub fn inject(&self, data: &[u8]) {
        self.rx.lock().extend_from_slice(data);
    }

    /// 링크 종료 (양쪽 모두 이후 I/O 실패)
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// 쓰기 호출 수
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// 유실된 쓰기 수
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// 적용된 설정 이력
    pub fn applied_settings(&self) -> &[RadioSettings] {
        &self.applied
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback link closed"));
        }
        Ok(())
    }
}

impl Channel for LoopbackChannel {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.check_open()?;

        let n = data.len().min(self.max_write);
        self.writes += 1;

        if let Some(filter) = self.filter.as_mut() {
            if !filter(&data[..n]) {
                self.dropped += 1;
                trace!("루프백 쓰기 유실: {} bytes", n);
                return Ok(n);
            }
        }

        self.tx.lock().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.check_open()?;
        Ok(self.rx.lock().len())
    }

    fn read(&mut self, n: usize) -> io::Result<Bytes> {
        self.check_open()?;
        let mut rx = self.rx.lock();
        let n = n.min(rx.len());
        Ok(rx.split_to(n).freeze())
    }

    fn max_write_size(&self) -> usize {
        self.max_write
    }

    fn configure(&mut self, settings: &RadioSettings) -> Result<()> {
        if let Some(table) = &self.table {
            table.encode(settings)?;
        }
        self.applied.push(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Sx126xTable;

    #[test]
    fn test_pair_is_duplex() {
        let (mut a, mut b) = LoopbackChannel::pair();
        a.write(b"ping").unwrap();
        b.write(b"pong").unwrap();

        assert_eq!(b.bytes_available().unwrap(), 4);
        assert_eq!(b.read(2).unwrap().as_ref(), b"pi");
        assert_eq!(b.read(10).unwrap().as_ref(), b"ng");
        assert_eq!(a.read(10).unwrap().as_ref(), b"pong");
    }

    #[test]
    fn test_write_filter_drops() {
        let (a, mut b) = LoopbackChannel::pair();
        let mut a = a.with_write_filter(|data| data != b"lost");

        assert_eq!(a.write(b"lost").unwrap(), 4);
        a.write(b"kept").unwrap();

        assert_eq!(a.dropped(), 1);
        assert_eq!(b.read(100).unwrap().as_ref(), b"kept");
    }

    #[test]
    fn test_configure_with_table() {
        let (a, _b) = LoopbackChannel::pair();
        let mut a = a.with_table(Sx126xTable);

        assert!(a.configure(&RadioSettings::default()).is_ok());
        let bad = RadioSettings {
            power_dbm: 30,
            ..RadioSettings::default()
        };
        assert!(a.configure(&bad).is_err());
        assert_eq!(a.applied_settings(), &[RadioSettings::default()]);
    }
}
