use clap::Parser;
use haier_ac::{Config, Interface, Session, frame::ProtocolVariant, status::error_message};
use std::{error::Error, time::Duration};
use strum::VariantNames;
use tokio::time::{self, Instant};

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Framing variant spoken by the indoor unit
    #[arg(short, long, value_parser = parse_variant, default_value = "extended")]
    variant: ProtocolVariant,

    /// Status polling interval in seconds
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Network signal strength in dBm reported to the device
    #[arg(short, long, allow_hyphen_values = true)]
    signal: Option<i8>,
}

fn parse_variant(s: &str) -> Result<ProtocolVariant, String> {
    s.parse()
        .map_err(|_| format!("expected one of: {}", ProtocolVariant::VARIANTS.join(", ")))
}

fn print_status(session: &Session) {
    let Some(status) = session.status() else {
        return;
    };

    match status.mode {
        Some(mode) => println!("Mode: {mode}"),
        None => println!("Mode: unsupported"),
    }

    match status.fan_mode {
        Some(fan_mode) => println!("Fan: {fan_mode}"),
        None => println!("Fan: unknown"),
    }

    println!("Swing: {}", status.swing_mode);
    println!("Preset: {}", status.preset);
    println!("Target temperature: {} °C", status.target_temperature);
    println!("Room temperature: {:.1} °C", status.current_temperature);
    println!("Outdoor temperature: {} °C", status.outdoor_temperature);
    println!("Humidity: {} %", status.humidity);
    println!("Display: {}", if status.display { "on" } else { "off" });

    if status.error_code != 0 {
        println!(
            "Error {:#04x}: {}",
            status.error_code,
            error_message(status.error_code).unwrap_or("unknown error")
        );
    }

    if session.active_alarms() != 0 {
        println!("Alarms: {:#018x}", session.active_alarms());
    }

    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = Config::default()
        .with_variant(args.variant)
        .with_status_interval(Duration::from_secs(args.interval))
        .with_signal_report(args.signal.is_some());

    let port = haier_ac::serial::open(&args.port)?;
    let start = Instant::now();
    let mut intf = Interface::new(port, config, start.elapsed());

    intf.session_mut().set_signal_strength(args.signal);

    loop {
        tokio::select! {
            res = intf.receive(start.elapsed()) => res?,
            () = time::sleep(TICK) => {}
        }

        intf.process(start.elapsed()).await?;

        if intf.session_mut().take_update() {
            if let Some(info) = intf.session().device_info() {
                println!("Device: {} ({})", info.device_name, info.software_version);
            }

            print_status(intf.session());
        }
    }
}
