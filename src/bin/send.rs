//! loratx 송신기
//!
//! UDP로 에뮬레이션한 무선 링크 위로 파일 하나를 보낸다.
//! - 데이터그램 경계가 없는 바이트 스트림으로 취급
//! - `--loss`로 쓰기 유실을 흉내 냄
//!
//! 사용법:
//!   cargo run --release --bin loratx-send -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin loratx-send -- --peer 127.0.0.1:9001 --file photo.png
//!
//!   # 연결 테스트 후 20% 유실 링크로 전송
//!   cargo run --release --bin loratx-send -- -p 127.0.0.1:9001 -f photo.png --probe --loss 0.2
//!
//!   # 송신 출력을 바꿔 가며 반복 전송하고 결과를 CSV로 저장
//!   cargo run --release --bin loratx-send -- -f photo.png --sweep power --csv power_results.csv

use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use loratx::sweep::write_csv;
use loratx::{run_sweep, Config, DigestKind, RadioSettings, Session, SweepAxis, UdpChannel};

/// 송신기 설정
struct SendArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    file_path: Option<PathBuf>,
    identifier: Option<String>,
    loss: f64,
    probe: bool,
    sweep: Option<SweepAxis>,
    csv_path: Option<PathBuf>,
    radio: RadioSettings,
    config: Config,
}

impl Default for SendArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            file_path: None,
            identifier: None,
            loss: 0.0,
            probe: false,
            sweep: None,
            csv_path: None,
            radio: RadioSettings::default(),
            config: Config::default(),
        }
    }
}

const HELP: &str = r#"loratx-send - 저속 무선 링크용 청크 전송 송신기

UDP 에뮬레이션 링크로 파일 하나를 보내고 수신 측 ACK를 기다린다.
ACK가 오지 않으면 전체 전송을 한 번 더 보낸다.

사용법:
  cargo run --release --bin loratx-send -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:9000)
  -p, --peer <ADDR>        수신기 주소 (기본: 127.0.0.1:9001)
  -f, --file <PATH>        전송할 파일 경로 (없으면 4KB 테스트 데이터)
  --id <NAME>              전송 식별자 (기본: 파일 이름)
  --preset <NAME>          설정 프리셋: long-range | short-range (다른 설정 옵션보다 먼저)
  --chunk-size <SIZE>      청크 크기 바이트 (기본: 236)
  --interval <MS>          프레임 간격 밀리초 (기본: 100)
  --retries <N>            전체 재전송 횟수 (기본: 1)
  --hash <KIND>            다이제스트: none | crc32 | sha256 (기본: crc32)
  --no-ack                 ACK를 기다리지 않음
  --probe                  전송 전 연결 테스트
  --loss <RATIO>           쓰기 유실 비율 0.0~1.0 (기본: 0.0)
  --address <N>            모듈 주소 (기본: 36)
  --power <DBM>            송신 출력 22|17|13|10 (기본: 22)
  --air-speed <BPS>        공중 속도 1200~115200 (기본: 2400)
  --sweep <AXIS>           power | air-speed 값을 바꿔 가며 반복 전송
  --csv <PATH>             스윕 결과를 CSV로 저장
  -h, --help               이 도움말 출력
"#;

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 옵션에 값이 필요함", flag))
}

fn parse<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{} 옵션 값이 유효하지 않음: {}", flag, raw))
}

fn parse_args() -> Result<SendArgs, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SendArgs::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => {
                config.bind_addr = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--peer" | "-p" => {
                config.peer_addr = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--file" | "-f" => {
                config.file_path = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--id" => {
                config.identifier = Some(value(&args, i, flag)?.to_string());
                i += 1;
            }
            "--preset" => {
                // 설정 전체를 교체하므로 다른 설정 옵션보다 앞에 와야 함
                config.config = match value(&args, i, flag)? {
                    "long-range" => Config::long_range(),
                    "short-range" => Config::short_range(),
                    other => return Err(format!("알 수 없는 프리셋: {}", other)),
                };
                i += 1;
            }
            "--chunk-size" => {
                config.config.chunk_size = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--interval" => {
                config.config.chunk_interval_ms = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--retries" => {
                config.config.max_retries = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--hash" => {
                config.config.digest = match value(&args, i, flag)? {
                    "none" => DigestKind::None,
                    "crc32" => DigestKind::Crc32,
                    "sha256" => DigestKind::Sha256,
                    other => return Err(format!("알 수 없는 다이제스트: {}", other)),
                };
                i += 1;
            }
            "--no-ack" => config.config.await_ack = false,
            "--probe" => config.probe = true,
            "--loss" => {
                config.loss = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--address" => {
                config.radio.address = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--power" => {
                config.radio.power_dbm = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--air-speed" => {
                config.radio.air_speed = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--sweep" => {
                config.sweep = Some(parse(value(&args, i, flag)?, flag)?);
                i += 1;
            }
            "--csv" => {
                config.csv_path = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    info!("loratx sender starting...");
    info!("Bind address: {}, peer: {}", args.bind_addr, args.peer_addr);
    info!(
        "Chunk size: {} bytes, interval: {}ms",
        args.config.chunk_size, args.config.chunk_interval_ms
    );
    if args.loss > 0.0 {
        info!("Emulated loss: {:.1}%", args.loss * 100.0);
    }

    // 전송할 데이터 준비
    let (payload, default_id) = match &args.file_path {
        Some(path) => {
            info!("Loading file: {:?}", path);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "payload".to_string());
            (std::fs::read(path)?, name)
        }
        None => {
            // 테스트용 더미 데이터 (4KB)
            info!("Using test data (4KB)");
            (vec![0xABu8; 4 * 1024], "test.bin".to_string())
        }
    };
    let identifier = args.identifier.unwrap_or(default_id);

    let channel = UdpChannel::bind(args.bind_addr, args.peer_addr).await?.with_loss(args.loss);
    let mut session = Session::open(channel, args.config, args.radio)?;

    if args.probe {
        match session.probe().await? {
            Some(rtt) => info!("Connection test OK ({:.0}ms)", rtt.as_secs_f64() * 1000.0),
            None => {
                warn!("연결 테스트 실패, 전송 중단");
                return Ok(());
            }
        }
    }

    if let Some(axis) = args.sweep {
        let runs = run_sweep(&mut session, axis, &axis.values(), Bytes::from(payload), &identifier).await?;

        info!("Sweep {} finished: {} runs", axis, runs.len());
        for run in &runs {
            info!("  {} {}: {:?}, {:.2}s", axis, run.value, run.status, run.elapsed.as_secs_f64());
        }
        if let Some(path) = &args.csv_path {
            write_csv(File::create(path)?, &runs)?;
            info!("Results saved to {:?}", path);
        }
        return Ok(());
    }

    let result = session.send(payload, &identifier).await?;

    info!("Transfer {:?}: {}", result.status, identifier);
    info!("  Time: {:.2}s", result.elapsed.as_secs_f64());
    info!("  {}", result.stats.summary());
    if let Some(e) = &result.error {
        warn!("채널 에러: {}", e);
    }
    info!("Dropped writes (emulated): {}", session.channel().dropped());

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
