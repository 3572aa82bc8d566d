//! loratx 수신기
//!
//! UDP로 에뮬레이션한 무선 링크에서 전송을 받아 파일로 저장한다.
//! 헤더를 기다리는 동안 들어온 연결 테스트에는 자동으로 응답한다.
//!
//! 사용법:
//!   cargo run --release --bin loratx-recv -- [OPTIONS]
//!
//! 예시:
//!   # 한 건 수신 후 종료
//!   cargo run --release --bin loratx-recv -- --peer 127.0.0.1:9000 --output received.png
//!
//!   # 계속 수신, 식별자 이름으로 디렉터리에 저장
//!   cargo run --release --bin loratx-recv -- -p 127.0.0.1:9000 --dir inbox --keep

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use loratx::{Config, RadioSettings, Session, TransferResult, TransferStatus, UdpChannel};

/// 수신기 설정
struct RecvArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    output_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    keep_running: bool,
    save_partial: bool,
    loss: f64,
    radio: RadioSettings,
    config: Config,
}

impl Default for RecvArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            output_path: None,
            output_dir: None,
            keep_running: false,
            save_partial: false,
            loss: 0.0,
            radio: RadioSettings::default(),
            config: Config::default(),
        }
    }
}

const HELP: &str = r#"loratx-recv - 저속 무선 링크용 청크 전송 수신기

UDP 에뮬레이션 링크에서 전송을 받아 파일로 저장한다.
모든 청크를 받고 다이제스트가 맞을 때만 ACK를 보낸다.

사용법:
  cargo run --release --bin loratx-recv -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:9001)
  -p, --peer <ADDR>        송신기 주소 (기본: 127.0.0.1:9000)
  -o, --output <PATH>      저장 경로 (기본: 전송 식별자)
  -d, --dir <PATH>         식별자 이름으로 저장할 디렉터리
  -k, --keep               한 건 받은 뒤에도 계속 수신
  --partial                타임아웃/무결성 실패 데이터도 .partial로 저장
  --preset <NAME>          설정 프리셋: long-range | short-range (다른 설정 옵션보다 먼저)
  --chunk-size <SIZE>      청크 크기 바이트, 송신기와 같아야 함 (기본: 236)
  --header-timeout <MS>    헤더 대기 밀리초 (기본: 120000)
  --idle-timeout <MS>      청크 사이 무응답 허용 밀리초 (기본: 10000)
  --max-size <BYTES>       받아들일 최대 페이로드 (기본: 16MB)
  --loss <RATIO>           쓰기 유실 비율 0.0~1.0 (기본: 0.0)
  --address <N>            모듈 주소 (기본: 36)
  --power <DBM>            송신 출력 22|17|13|10 (기본: 22)
  --air-speed <BPS>        공중 속도 1200~115200 (기본: 2400)
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

fn parse_args() -> Result<RecvArgs, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RecvArgs::default();

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
            "--output" | "-o" => {
                config.output_path = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--dir" | "-d" => {
                config.output_dir = Some(PathBuf::from(value(&args, i, flag)?));
                i += 1;
            }
            "--keep" | "-k" => config.keep_running = true,
            "--partial" => config.save_partial = true,
            "--preset" => {
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
            "--header-timeout" => {
                config.config.header_timeout_ms = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--idle-timeout" => {
                config.config.idle_timeout_ms = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
            "--max-size" => {
                config.config.max_payload_size = parse(value(&args, i, flag)?, flag)?;
                i += 1;
            }
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

/// 결과를 저장할 경로 결정
fn output_path(args: &RecvArgs, result: &TransferResult) -> PathBuf {
    if let Some(path) = &args.output_path {
        return path.clone();
    }

    // 식별자는 경로 구분자를 포함할 수 있으므로 파일 이름 부분만 사용
    let name = result
        .identifier
        .as_deref()
        .and_then(|id| std::path::Path::new(id).file_name())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("received.bin"));

    match &args.output_dir {
        Some(dir) => dir.join(name),
        None => name,
    }
}

fn save(args: &RecvArgs, result: &TransferResult) -> std::io::Result<()> {
    let Some(payload) = &result.payload else {
        return Ok(());
    };

    let mut path = output_path(args, result);
    match result.status {
        TransferStatus::Success => {}
        TransferStatus::IntegrityFailed | TransferStatus::TimedOut
            if args.save_partial && result.identifier.is_some() =>
        {
            let mut name = path.into_os_string();
            name.push(".partial");
            path = PathBuf::from(name);
        }
        _ => return Ok(()),
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, payload)?;
    info!("Saved {} bytes to {:?}", payload.len(), path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;

    info!("loratx receiver starting...");
    info!("Bind address: {}, peer: {}", args.bind_addr, args.peer_addr);
    info!("Chunk size: {} bytes", args.config.chunk_size);

    let channel = UdpChannel::bind(args.bind_addr, args.peer_addr).await?.with_loss(args.loss);
    let mut session = Session::open(channel, args.config.clone(), args.radio.clone())?;

    loop {
        let result = session.receive().await;

        match result.status {
            TransferStatus::Success => {
                info!(
                    "Transfer complete: {} ({:.2}s)",
                    result.identifier.as_deref().unwrap_or("?"),
                    result.elapsed.as_secs_f64()
                );
            }
            TransferStatus::IntegrityFailed => {
                warn!("무결성 검사 실패: {}", result.identifier.as_deref().unwrap_or("?"));
            }
            TransferStatus::TimedOut if result.identifier.is_some() => {
                warn!(
                    "전송 미완료: {} 청크 누락 {:?}",
                    result.missing.len(),
                    result.missing
                );
            }
            TransferStatus::TimedOut => info!("No transfer received"),
            TransferStatus::ChannelError => {
                error!("채널 에러: {:?}", result.error);
                std::process::exit(1);
            }
        }
        info!("  {}", result.stats.summary());

        save(&args, &result)?;

        if !args.keep_running {
            break;
        }
    }

    Ok(())
}
