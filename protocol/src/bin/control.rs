use clap::Parser;
use haier_ac::{
    Config, Interface, Phase,
    climate::{
        FanMode, MAX_TARGET_TEMPERATURE, MIN_TARGET_TEMPERATURE, Mode, Preset, SwingMode,
    },
    control::ControlRequest,
    frame::ProtocolVariant,
};
use std::{error::Error, str::FromStr, time::Duration};
use strum::VariantNames;
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::mpsc::{self, UnboundedSender},
    time::{self, Instant},
};

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Framing variant spoken by the indoor unit
    #[arg(short, long, value_parser = parse_name::<ProtocolVariant>, default_value = "extended")]
    variant: ProtocolVariant,

    /// Operating mode
    #[arg(short, long, value_parser = parse_name::<Mode>)]
    mode: Option<Mode>,

    /// Fan mode
    #[arg(short, long, value_parser = parse_name::<FanMode>)]
    fan: Option<FanMode>,

    /// Swing mode
    #[arg(short, long, value_parser = parse_name::<SwingMode>)]
    swing: Option<SwingMode>,

    /// Target temperature in °C
    #[arg(short, long, value_parser = parse_temperature)]
    temperature: Option<u8>,

    /// Special preset
    #[arg(long, value_parser = parse_name::<Preset>)]
    preset: Option<Preset>,

    /// Read further requests (e.g. `mode=heat temperature=22`) from stdin
    #[arg(long)]
    stdin: bool,
}

fn parse_name<T: FromStr + VariantNames>(s: &str) -> Result<T, String> {
    s.parse()
        .map_err(|_| format!("expected one of: {}", T::VARIANTS.join(", ")))
}

fn parse_temperature(s: &str) -> Result<u8, String> {
    let celsius: u8 = s.parse().map_err(|err| format!("{err}"))?;

    if (MIN_TARGET_TEMPERATURE..=MAX_TARGET_TEMPERATURE).contains(&celsius) {
        Ok(celsius)
    } else {
        Err(format!(
            "expected a value between {MIN_TARGET_TEMPERATURE} and {MAX_TARGET_TEMPERATURE}"
        ))
    }
}

async fn read_requests(tx: UnboundedSender<ControlRequest>) {
    let mut lines = BufReader::new(io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ControlRequest>() {
            Ok(req) => {
                if tx.send(req).is_err() {
                    break;
                }
            }
            Err(err) => eprintln!("Invalid request: {err}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let req = ControlRequest {
        mode: args.mode,
        fan_mode: args.fan,
        swing_mode: args.swing,
        target_temperature: args.temperature,
        preset: args.preset,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();

    if !req.is_empty() {
        tx.send(req)?;
    }

    if args.stdin {
        tokio::spawn(read_requests(tx));
    } else {
        drop(tx);
    }

    let port = haier_ac::serial::open(&args.port)?;
    let start = Instant::now();
    let mut intf = Interface::new(
        port,
        Config::default().with_variant(args.variant),
        start.elapsed(),
    );

    // Requests are only accepted once the handshake completed
    let mut queued = Vec::new();
    let mut closed = false;

    loop {
        tokio::select! {
            res = intf.receive(start.elapsed()) => res?,
            req = rx.recv(), if !closed => match req {
                Some(req) => queued.push(req),
                None => closed = true,
            },
            () = time::sleep(TICK) => {}
        }

        intf.process(start.elapsed()).await?;

        let session = intf.session_mut();

        if session.phase() < Phase::Idle {
            continue;
        }

        for req in queued.drain(..) {
            println!("Requesting {req:?}");
            session.control(&req);
        }

        if session.take_update() {
            if let Some(status) = session.status() {
                println!("Status: {status:?}");
            }
        }

        if closed && !session.pending().is_valid() {
            break;
        }
    }

    Ok(())
}
