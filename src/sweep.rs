//! 무선 설정 스윕
//!
//! 같은 페이로드를 송신 출력 또는 공중 속도를 바꿔 가며 보내고, 설정값마다
//! 전송에 걸린 시간을 기록한다. 설정은 전송과 전송 사이에만 바뀐다.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use crate::channel::{Channel, RadioSettings, Sx126xTable};
use crate::session::{Session, TransferStatus};
use crate::{Error, Result};

/// 스윕할 설정 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAxis {
    Power,
    AirSpeed,
}

impl SweepAxis {
    pub fn name(&self) -> &'static str {
        match self {
            SweepAxis::Power => "power",
            SweepAxis::AirSpeed => "air_speed",
        }
    }

    /// 모듈이 지원하는 값 전체 (표 순서)
    pub fn values(&self) -> Vec<u32> {
        match self {
            SweepAxis::Power => Sx126xTable::power_levels().map(u32::from).collect(),
            SweepAxis::AirSpeed => Sx126xTable::air_speeds().collect(),
        }
    }

    /// `base`에서 이 항목만 `value`로 바꾼 설정
    pub fn apply(&self, base: &RadioSettings, value: u32) -> Result<RadioSettings> {
        let mut settings = base.clone();
        match self {
            SweepAxis::Power => {
                settings.power_dbm = u8::try_from(value).map_err(|_| Error::InvalidSetting {
                    field: "power_dbm",
                    value: value.to_string(),
                })?;
            }
            SweepAxis::AirSpeed => settings.air_speed = value,
        }
        Ok(settings)
    }
}

impl FromStr for SweepAxis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "power" => Ok(SweepAxis::Power),
            "air-speed" | "air_speed" => Ok(SweepAxis::AirSpeed),
            other => Err(Error::InvalidConfig(format!("알 수 없는 스윕 항목: {}", other))),
        }
    }
}

impl fmt::Display for SweepAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 설정값 하나에 대한 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepRun {
    pub value: u32,
    pub status: TransferStatus,
    pub elapsed: Duration,
}

/// `values`를 차례로 적용하며 같은 페이로드를 보냄
///
/// 채널 장애가 나면 그 전송까지 기록하고 멈춘다. 마지막 설정은 되돌리지
/// 않는다.
pub async fn run_sweep<C: Channel>(
    session: &mut Session<C>,
    axis: SweepAxis,
    values: &[u32],
    payload: Bytes,
    identifier: &str,
) -> Result<Vec<SweepRun>> {
    let base = session.radio().clone();
    let mut runs = Vec::with_capacity(values.len());

    for &value in values {
        session.reconfigure(axis.apply(&base, value)?)?;
        let result = session.send(payload.clone(), identifier).await?;

        info!(
            "{} {}: {:?}, {:.2}s",
            axis,
            value,
            result.status,
            result.elapsed.as_secs_f64()
        );
        runs.push(SweepRun {
            value,
            status: result.status,
            elapsed: result.elapsed,
        });

        if result.status == TransferStatus::ChannelError {
            warn!("채널 에러로 스윕 중단: {} {}", axis, value);
            break;
        }
    }

    Ok(runs)
}

/// 스윕 결과를 CSV로 기록
pub fn write_csv<W: io::Write>(mut out: W, runs: &[SweepRun]) -> io::Result<()> {
    writeln!(out, "Setting Value,Latency,Status")?;
    for run in runs {
        writeln!(
            out,
            "{},{:.3},{:?}",
            run.value,
            run.elapsed.as_secs_f64(),
            run.status
        )?;
    }
    Ok(())
}
