//! SX126x UART 무선 모듈 설정 표
//!
//! 설정 명령 레이아웃 (9 bytes):
//!
//! ```text
//! [0xC0][addr lo][addr hi][net id][speed][packet size][power][0x00][0x00]
//! ```

use crate::channel::{RadioSettings, SettingsTable};
use crate::{Error, Result};

/// 설정 명령 헤더 (레지스터 저장)
const CMD_SET_REGISTER: u8 = 0xC0;

/// 공중 속도 (bps) -> 레지스터 값
const AIR_SPEED: [(u32, u8); 8] = [
    (1200, 0x00),
    (2400, 0x20),
    (4800, 0x40),
    (9600, 0x60),
    (19200, 0x80),
    (38400, 0xA0),
    (57600, 0xC0),
    (115200, 0xE0),
];

/// 패킷 크기 -> 레지스터 값
const PACKET_SIZE: [(usize, u8); 4] = [(240, 0x00), (128, 0x40), (64, 0x80), (32, 0xC0)];

/// 송신 출력 (dBm) -> 레지스터 값
const POWER: [(u8, u8); 4] = [(22, 0x00), (17, 0x01), (13, 0x02), (10, 0x03)];

/// 900MHz 대역 모델의 주파수 범위
const FREQUENCY_MHZ: std::ops::RangeInclusive<u16> = 850..=930;

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K) -> Option<V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn invalid(field: &'static str, value: impl ToString) -> Error {
    Error::InvalidSetting {
        field,
        value: value.to_string(),
    }
}

/// SX126x 설정 표
#[derive(Debug, Clone, Copy, Default)]
pub struct Sx126xTable;

impl Sx126xTable {
    /// 지원하는 송신 출력 목록
    pub fn power_levels() -> impl Iterator<Item = u8> {
        POWER.iter().map(|(dbm, _)| *dbm)
    }

    /// 지원하는 공중 속도 목록
    pub fn air_speeds() -> impl Iterator<Item = u32> {
        AIR_SPEED.iter().map(|(bps, _)| *bps)
    }

    /// 설정 명령 생성
    pub fn register_bytes(&self, settings: &RadioSettings) -> Result<[u8; 9]> {
        let speed = lookup(&AIR_SPEED, settings.air_speed)
            .ok_or_else(|| invalid("air_speed", settings.air_speed))?;
        let packet = lookup(&PACKET_SIZE, settings.max_frame_size)
            .ok_or_else(|| invalid("max_frame_size", settings.max_frame_size))?;
        let power = lookup(&POWER, settings.power_dbm)
            .ok_or_else(|| invalid("power_dbm", settings.power_dbm))?;

        if !FREQUENCY_MHZ.contains(&settings.frequency_mhz) {
            return Err(invalid("frequency_mhz", settings.frequency_mhz));
        }
        if let Some(sf) = settings.spreading_factor {
            if !(5..=12).contains(&sf) {
                return Err(invalid("spreading_factor", sf));
            }
        }
        if let Some(cr) = settings.coding_rate {
            if !(5..=8).contains(&cr) {
                return Err(invalid("coding_rate", cr));
            }
        }

        let [addr_lo, addr_hi] = settings.address.to_le_bytes();
        Ok([
            CMD_SET_REGISTER,
            addr_lo,
            addr_hi,
            settings.network_id,
            speed,
            packet,
            power,
            0x00,
            0x00,
        ])
    }
}

impl SettingsTable for Sx126xTable {
    fn encode(&self, settings: &RadioSettings) -> Result<Vec<u8>> {
        self.register_bytes(settings).map(|bytes| bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_encoding() {
        let bytes = Sx126xTable.register_bytes(&RadioSettings::default()).unwrap();
        assert_eq!(bytes, [0xC0, 36, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_address_and_power_encoding() {
        let settings = RadioSettings {
            address: 0x1234,
            network_id: 7,
            power_dbm: 10,
            air_speed: 115200,
            max_frame_size: 64,
            ..RadioSettings::default()
        };
        let bytes = Sx126xTable.register_bytes(&settings).unwrap();
        assert_eq!(bytes, [0xC0, 0x34, 0x12, 7, 0xE0, 0x80, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_rejects_unknown_values() {
        let cases = [
            RadioSettings { power_dbm: 20, ..RadioSettings::default() },
            RadioSettings { air_speed: 300, ..RadioSettings::default() },
            RadioSettings { max_frame_size: 200, ..RadioSettings::default() },
            RadioSettings { frequency_mhz: 433, ..RadioSettings::default() },
            RadioSettings { spreading_factor: Some(13), ..RadioSettings::default() },
            RadioSettings { coding_rate: Some(4), ..RadioSettings::default() },
        ];
        for settings in cases {
            assert!(matches!(
                Sx126xTable.encode(&settings),
                Err(Error::InvalidSetting { .. })
            ));
        }
    }

    #[test]
    fn test_supported_values() {
        assert_eq!(Sx126xTable::power_levels().collect::<Vec<_>>(), vec![22, 17, 13, 10]);
        assert_eq!(Sx126xTable::air_speeds().count(), 8);
    }
}
