//! Serline Terminal
//!
//! Opens a serial port, prints what the device sends, and writes what is
//! typed. Logs go to stderr so they stay out of the received data.

mod cli;
mod settings;

use std::io::{self, BufRead, Write};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serline_detect::PortScanner;
use serline_transport::{
    spawn_receiver, CancellationToken, FrameEnd, ReceiveEvent, ReceiveMode, Transport,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::Args;
use settings::Settings;

/// Typed on its own line to quit
const EXIT_COMMAND: &str = "exit";

/// Largest chunk printed at once with `--raw`
const RAW_CHUNK: usize = 4096;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "serline=info,serline_transport=info,serline_detect=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let scanner = Arc::new(PortScanner::new());

    if args.list {
        return list_ports(&scanner, &args);
    }

    let mut settings = Settings::load();
    args.apply(&mut settings);
    let terminator = cli::parse_terminator(&settings.terminator)?;

    let address = match &args.port {
        Some(port) => port.clone(),
        None => {
            let ports = scanner.list(args.vid, args.pid)?;
            let last = settings.port.address.as_deref();
            match cli::choose_port(&ports, last, io::stdin().lock(), io::stdout())? {
                Some(address) => address,
                None => return Ok(()),
            }
        }
    };

    info!("Starting serline on {}", address);
    let transport = Arc::new(Transport::with_settings(
        scanner.clone(),
        settings.port.clone(),
    ));
    transport
        .open(address.as_str())
        .with_context(|| format!("Failed to open {}", address))?;

    settings.port = transport.settings();
    if let Err(e) = settings.save() {
        warn!("{}", e);
    }

    let mode = if settings.raw {
        ReceiveMode::Chunks { max_len: RAW_CHUNK }
    } else {
        ReceiveMode::Frames {
            terminator,
            max_len: None,
        }
    };
    run_session(&transport, mode)
}

fn list_ports(scanner: &PortScanner, args: &Args) -> Result<()> {
    let ports = scanner.ports(args.vid, args.pid)?;
    if ports.is_empty() {
        println!("No ports found");
    }
    for port in ports {
        println!("{:<28} {} ({})", port.address, port.description(), port.kind);
    }
    Ok(())
}

/// Receive in the background and write stdin lines until `exit`
fn run_session(transport: &Arc<Transport>, mode: ReceiveMode) -> Result<()> {
    let stop = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel();

    let receiver = spawn_receiver(transport.clone(), mode, events_tx, stop.clone())
        .context("Failed to start receiver")?;

    let printer = {
        let stop = stop.clone();
        thread::Builder::new()
            .name("serline-print".into())
            .spawn(move || {
                let stdout = io::stdout();
                for event in events_rx {
                    let gone = matches!(event, ReceiveEvent::Disconnected { .. });
                    if let Err(e) = print_event(&mut stdout.lock(), &event) {
                        error!("Failed to print: {}", e);
                    }
                    if gone {
                        stop.cancel();
                    }
                }
            })
            .context("Failed to start printer")?
    };

    println!("To exit the program, enter '{}'.", EXIT_COMMAND);
    for line in io::stdin().lock().lines() {
        let line = line?;
        if stop.is_cancelled() || line.trim() == EXIT_COMMAND {
            break;
        }

        let mut data = line.into_bytes();
        data.push(b'\n');
        if let Err(e) = transport.write(&data) {
            error!("Write failed: {}", e);
            if !transport.is_open() {
                break;
            }
        }
    }

    stop.cancel();
    transport.close();

    let exit = receiver
        .join()
        .map_err(|_| anyhow!("receiver thread panicked"))?;
    info!("Receiver ended: {:?}", exit);
    printer
        .join()
        .map_err(|_| anyhow!("printer thread panicked"))?;
    Ok(())
}

fn print_event(out: &mut impl Write, event: &ReceiveEvent) -> io::Result<()> {
    match event {
        ReceiveEvent::Frame(frame) => {
            out.write_all(frame.bytes())?;
            if matches!(frame.end(), FrameEnd::TimedOut | FrameEnd::Closed) {
                // Partial frame; keep the prompt on its own line.
                writeln!(out)?;
            }
        }
        ReceiveEvent::Data(data) => out.write_all(data)?,
        ReceiveEvent::Disconnected { address } => {
            writeln!(out, "\n{} disconnected; press Enter to quit", address)?
        }
        ReceiveEvent::Failed(reason) => writeln!(out, "\nreceive failed: {}", reason)?,
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serline_transport::Frame;

    fn printed(event: ReceiveEvent) -> String {
        let mut out = Vec::new();
        print_event(&mut out, &event).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_print_events() {
        assert_eq!(
            printed(ReceiveEvent::Frame(Frame::new(b"ok\n".to_vec(), FrameEnd::Terminator))),
            "ok\n"
        );
        assert_eq!(
            printed(ReceiveEvent::Frame(Frame::new(b"par".to_vec(), FrameEnd::TimedOut))),
            "par\n"
        );
        assert_eq!(
            printed(ReceiveEvent::Frame(Frame::new(b"cut".to_vec(), FrameEnd::Closed))),
            "cut\n"
        );
        assert_eq!(printed(ReceiveEvent::Data(b"raw".to_vec())), "raw");
        assert!(printed(ReceiveEvent::Disconnected {
            address: "/dev/ttyACM0".into()
        })
        .contains("/dev/ttyACM0 disconnected"));
    }
}
