//! 전송 통계

use std::time::Duration;

use tokio::time::Instant;

/// 전송 한 건의 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송 시도 횟수 (송신측)
    pub attempts: u32,

    /// 보낸 프레임 수
    pub frames_sent: u64,

    /// 보낸 바이트 수 (프레임 오버헤드 포함)
    pub bytes_sent: u64,

    /// 받은 바이트 수
    pub bytes_received: u64,

    /// 받은 청크 수 (중복 포함)
    pub chunks_received: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 범위 밖 시퀀스로 버린 청크 수
    pub out_of_range_chunks: u64,

    /// 디코딩 에러 수 (범위 밖 시퀀스 제외)
    pub decode_errors: u64,

    /// 받은 헤더 수 (재전송 포함)
    pub headers_received: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            attempts: 0,
            frames_sent: 0,
            bytes_sent: 0,
            bytes_received: 0,
            chunks_received: 0,
            duplicate_chunks: 0,
            out_of_range_chunks: 0,
            decode_errors: 0,
            headers_received: 0,
        }
    }

    /// 프레임 하나 송신 기록
    pub fn record_frame(&mut self, len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec, 송수신 합)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        (self.bytes_sent + self.bytes_received) as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Attempts: {} | Frames sent: {} ({} bytes) | Received: {} bytes, {} chunks ({} dup, {} out of range) | Decode errors: {} | Throughput: {:.1} B/s",
            self.elapsed().as_secs_f64(),
            self.attempts,
            self.frames_sent,
            self.bytes_sent,
            self.bytes_received,
            self.chunks_received,
            self.duplicate_chunks,
            self.out_of_range_chunks,
            self.decode_errors,
            self.throughput(),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
