// tools/slcan_cli/main.rs
//
// Command line front end for slcan-link: offline encode/decode of slcan lines,
// and monitor/send against a real adapter.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use slcan_link::io::slcan::{available_timings, decode_line, encode_frame, run_source};
use slcan_link::io::{list_ports, SerialPortTransport};
use slcan_link::logging::{init_file_logging, stop_file_logging};
use slcan_link::settings::{default_settings_path, load_settings, Settings};
use slcan_link::{tlog, FrameMessage, SlcanConfig, SlcanInterface, SourceMessage};

#[derive(Parser)]
#[command(name = "slcan_cli")]
#[command(about = "Talk to slcan (Lawicel) USB-CAN adapters")]
struct Cli {
    /// Settings file (TOML, or JSON with a .json extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this directory (overrides `log_dir` in the settings file)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a frame given in candump notation (123#DEADBEEF, 1ABCDE00#R2)
    Encode { frame: String },
    /// Decode one slcan line (t12320DEAD)
    Decode {
        line: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stream received frames to stdout
    Monitor {
        #[command(flatten)]
        target: Target,
        /// Print frames as JSON lines
        #[arg(long)]
        json: bool,
        /// Stop after this many frames
        #[arg(long)]
        count: Option<usize>,
    },
    /// Open the adapter, send one frame, close it
    Send {
        #[command(flatten)]
        target: Target,
        /// Frame in candump notation
        frame: String,
    },
    /// List the bitrates an slcan adapter can be set to
    Timings,
    /// List serial ports
    Ports,
}

/// Which adapter to use: an explicit port, or an interface from the settings file
#[derive(Args)]
struct Target {
    /// Serial port (overrides the settings file)
    #[arg(short, long)]
    port: Option<String>,

    /// Interface from the settings file, by display name or port
    #[arg(short, long)]
    interface: Option<String>,

    /// CAN bitrate in bits/second
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,
}

impl Target {
    fn resolve(&self, settings: &Settings) -> Result<SlcanConfig, String> {
        let mut config = match (&self.port, &self.interface) {
            (Some(port), _) => settings
                .interface(port)
                .cloned()
                .unwrap_or_else(|| SlcanConfig::for_port(port.as_str())),
            (None, Some(name)) => settings
                .interface(name)
                .cloned()
                .ok_or_else(|| format!("no interface named '{}' in settings", name))?,
            (None, None) => settings
                .interfaces
                .first()
                .cloned()
                .ok_or_else(|| "no --port given and no interfaces in settings".to_string())?,
        };
        if let Some(bitrate) = self.bitrate {
            config.bitrate = bitrate;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        config.validate().map_err(String::from)?;
        Ok(config)
    }
}

/// Show a wire line with its terminator visible
fn printable(line: &[u8]) -> String {
    String::from_utf8_lossy(line).replace('\r', "\\r")
}

fn print_frame(frame: &FrameMessage, json: bool) -> Result<(), String> {
    if json {
        let line = serde_json::to_string(frame).map_err(|e| e.to_string())?;
        println!("{}", line);
    } else {
        println!("{:>10}  {}", frame.timestamp_us, frame);
    }
    Ok(())
}

async fn monitor(config: SlcanConfig, json: bool, count: Option<usize>) -> Result<(), String> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let source = tokio::spawn(run_source(0, config, stop_flag.clone(), tx));

    let mut received = 0usize;
    let mut result = Ok(());
    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = tokio::signal::ctrl_c() => {
                stop_flag.store(true, Ordering::SeqCst);
                continue;
            }
        };
        match msg {
            Some(SourceMessage::Frames(_, frames)) => {
                for frame in &frames {
                    if count.is_some_and(|c| received >= c) {
                        break;
                    }
                    print_frame(frame, json)?;
                    received += 1;
                }
                if count.is_some_and(|c| received >= c) {
                    stop_flag.store(true, Ordering::SeqCst);
                }
            }
            Some(SourceMessage::Connected(_, device, bitrate)) => {
                tlog!("[cli] Monitoring {} at {} bit/s", device, bitrate);
            }
            Some(SourceMessage::TransmitReady(..)) => {}
            Some(SourceMessage::Error(_, e)) => {
                result = Err(e);
            }
            Some(SourceMessage::Ended(_, reason)) => {
                tlog!("[cli] Stream ended: {} ({} frames)", reason, received);
            }
            None => break,
        }
    }

    let _ = source.await;
    result
}

fn send(config: SlcanConfig, frame: &FrameMessage) -> Result<(), String> {
    let transport = SerialPortTransport::open(&config)?;
    let iface = SlcanInterface::new(config, transport);
    iface.open()?;
    let result = iface.send(frame);
    iface.close()?;
    let result = result?;
    println!(
        "sent {} ({} bytes{})",
        frame,
        result.bytes_written,
        if result.truncated { ", payload truncated to 8 bytes" } else { "" }
    );
    Ok(())
}

fn load(cli: &Cli) -> Result<Settings, String> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_settings_path()?,
    };
    load_settings(&path)
}

async fn run(cli: Cli, settings: Settings) -> Result<(), String> {
    match &cli.command {
        Command::Encode { frame } => {
            let frame: FrameMessage = frame.parse()?;
            println!("{}", printable(&encode_frame(&frame)));
        }
        Command::Decode { line, json } => {
            let frame = decode_line(line.trim_end_matches("\\r").as_bytes(), 0)?;
            print_frame(&frame, *json)?;
        }
        Command::Monitor {
            target,
            json,
            count,
        } => {
            let config = target.resolve(&settings)?;
            monitor(config, *json, *count).await?;
        }
        Command::Send { target, frame } => {
            let config = target.resolve(&settings)?;
            let frame: FrameMessage = frame.parse()?;
            tokio::task::spawn_blocking(move || send(config, &frame))
                .await
                .map_err(|e| e.to_string())??;
        }
        Command::Timings => {
            println!("{:>5}  {:>9}  {:>7}  command", "index", "bitrate", "sample");
            for t in available_timings() {
                let (cmd, _) = slcan_link::io::slcan::bitrate_command(t.bitrate);
                println!(
                    "{:>5}  {:>9}  {:>5.1}%  {}",
                    t.index,
                    t.bitrate,
                    t.sample_point as f32 / 10.0,
                    printable(&cmd)
                );
            }
        }
        Command::Ports => {
            for p in list_ports()? {
                match (p.vid, p.pid) {
                    (Some(vid), Some(pid)) => println!(
                        "{}  {} {:04x}:{:04x} {}",
                        p.port_name,
                        p.port_type,
                        vid,
                        pid,
                        p.product.unwrap_or_default()
                    ),
                    _ => println!("{}  {}", p.port_name, p.port_type),
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(dir) = settings.log_dir_for(cli.log_dir.as_deref()) {
        if let Err(e) = init_file_logging(&dir) {
            eprintln!("{}", e);
        }
    }

    let result = run(cli, settings).await;
    stop_file_logging();

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
