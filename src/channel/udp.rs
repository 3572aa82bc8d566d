//! UDP 무선 링크 에뮬레이터
//!
//! 쓰기 한 번이 데이터그램 하나가 된다. 수신한 데이터그램은 경계 없이
//! 바이트 스트림으로 이어 붙여, 프레이밍이 없는 시리얼 링크처럼 보이게 한다.
//! 유실률을 주면 쓰기를 무작위로 버린다.
//!
//! 소켓은 tokio 런타임에 등록되고, `Channel` 동작은 `try_send_to`/
//! `try_recv_from`으로 블로킹 없이 처리한다.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tracing::{debug, info, trace};

use crate::channel::{Channel, RadioSettings, SettingsTable, Sx126xTable, DEFAULT_MAX_WRITE_SIZE};
use crate::Result;

/// 수신 버퍼 크기
const RECV_BUFFER_SIZE: usize = 65535;

/// UDP 채널
pub struct UdpChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    pending: BytesMut,
    recv_buf: Vec<u8>,
    max_write: usize,
    loss_rate: f64,
    table: Box<dyn SettingsTable>,
    settings: Option<RadioSettings>,
    dropped: u64,
}

impl UdpChannel {
    /// 로컬 주소에 바인드하고 상대 주소를 고정
    pub async fn bind(local: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        // try_send_to는 런타임이 쓰기 가능을 한 번 확인한 뒤부터 동작함
        socket.writable().await?;

        info!("UDP 채널 바인드: {}, 상대: {}", socket.local_addr()?, peer);

        Ok(Self {
            socket,
            peer,
            pending: BytesMut::with_capacity(RECV_BUFFER_SIZE),
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            max_write: DEFAULT_MAX_WRITE_SIZE,
            loss_rate: 0.0,
            table: Box::new(Sx126xTable),
            settings: None,
            dropped: 0,
        })
    }

    /// 쓰기 유실률 (0.0 ~ 1.0)
    pub fn with_loss(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_write_size(mut self, max_write: usize) -> Self {
        self.max_write = max_write;
        self
    }

    /// 설정 검증 표 교체
    pub fn with_table(mut self, table: impl SettingsTable + 'static) -> Self {
        self.table = Box::new(table);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 마지막으로 적용된 설정
    pub fn settings(&self) -> Option<&RadioSettings> {
        self.settings.as_ref()
    }

    /// 유실된 쓰기 수
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 소켓에 쌓인 데이터그램을 모두 꺼내 스트림 버퍼에 붙임
    fn drain_socket(&mut self) -> io::Result<()> {
        loop {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok((len, from)) => {
                    if from != self.peer {
                        trace!("알 수 없는 송신자 무시: {}", from);
                        continue;
                    }
                    self.pending.extend_from_slice(&self.recv_buf[..len]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                // 상대가 아직 바인드하지 않았을 때 일부 플랫폼이 돌려줌
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Channel for UdpChannel {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(self.max_write);

        if self.loss_rate > 0.0 && rand::thread_rng().gen_bool(self.loss_rate) {
            self.dropped += 1;
            trace!("쓰기 유실 (에뮬레이션): {} bytes", n);
            return Ok(n);
        }

        match self.socket.try_send_to(&data[..n], self.peer) {
            Ok(sent) => Ok(sent),
            // 송신 버퍼가 찬 경우는 무선 유실과 같게 취급
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.dropped += 1;
                trace!("송신 버퍼 가득 참, 쓰기 유실: {} bytes", n);
                Ok(n)
            }
            Err(e) => Err(e),
        }
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.drain_socket()?;
        Ok(self.pending.len())
    }

    fn read(&mut self, n: usize) -> io::Result<Bytes> {
        let n = n.min(self.pending.len());
        Ok(self.pending.split_to(n).freeze())
    }

    fn max_write_size(&self) -> usize {
        self.max_write
    }

    fn configure(&mut self, settings: &RadioSettings) -> Result<()> {
        let command = self.table.encode(settings)?;
        debug!(
            "설정 명령: {} (address={}, power={}dBm, air_speed={}bps)",
            hex::encode(&command),
            settings.address,
            settings.power_dbm,
            settings.air_speed
        );
        self.settings = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_udp_pair_streams_bytes() {
        let mut a = UdpChannel::bind(local(), local()).await.unwrap();
        let mut b = UdpChannel::bind(local(), a.local_addr().unwrap()).await.unwrap();
        a.peer = b.local_addr().unwrap();

        a.write(b"IDENTIFIER:").unwrap();
        a.write(b"x\n").unwrap();

        let mut received = Vec::new();
        for _ in 0..100 {
            if b.bytes_available().unwrap() >= 13 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        received.extend_from_slice(&b.read(100).unwrap());
        assert_eq!(received, b"IDENTIFIER:x\n");
    }

    #[tokio::test]
    async fn test_configure_validates_settings() {
        let mut a = UdpChannel::bind(local(), local()).await.unwrap();
        assert!(a.configure(&RadioSettings::default()).is_ok());
        assert_eq!(a.settings(), Some(&RadioSettings::default()));

        let bad = RadioSettings {
            air_speed: 3,
            ..RadioSettings::default()
        };
        assert!(a.configure(&bad).is_err());
    }
}
