//! Command line arguments and the port prompt

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::settings::Settings;

/// Interactive serial terminal
///
/// Lines typed on stdin are written to the port followed by a newline.
/// Frames received from the port are printed to stdout. Type `exit` to quit.
#[derive(Debug, Parser)]
#[command(name = "serline", version, about)]
pub struct Args {
    /// Port to open; without it the available ports are offered
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Read timeout in milliseconds (0 polls without waiting)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Write timeout in milliseconds
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Frame terminator; accepts \n, \r, \t, \\ and \xNN escapes
    #[arg(short, long)]
    pub terminator: Option<String>,

    /// Print raw chunks as they arrive instead of frames
    #[arg(long)]
    pub raw: bool,

    /// Only offer USB ports with this vendor ID (hex)
    #[arg(long, value_parser = parse_hex_id)]
    pub vid: Option<u16>,

    /// Only offer USB ports with this product ID (hex)
    #[arg(long, value_parser = parse_hex_id)]
    pub pid: Option<u16>,

    /// List available ports and exit
    #[arg(short, long)]
    pub list: bool,
}

impl Args {
    /// Fold the arguments over the saved settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(baud) = self.baud {
            settings.port.baud_rate = baud;
        }
        if let Some(ms) = self.timeout_ms {
            settings.port.read_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = self.write_timeout_ms {
            settings.port.write_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(terminator) = &self.terminator {
            settings.terminator = terminator.clone();
        }
        if self.raw {
            settings.raw = true;
        }
    }
}

/// Parse a USB ID such as `2e8a` or `0x2E8A`
pub fn parse_hex_id(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid USB ID '{}': {}", s, e))
}

/// Expand escapes in a terminator given on the command line
pub fn parse_terminator(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut utf8 = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .with_context(|| format!("invalid \\x escape in terminator '{}'", s))?;
                out.push(byte);
            }
            Some(other) => bail!("unknown escape '\\{}' in terminator '{}'", other, s),
            None => bail!("terminator '{}' ends with a lone backslash", s),
        }
    }
    Ok(out)
}

/// Pick a port from `ports`
///
/// With no ports there is nothing to pick. A single port is used without
/// asking. Otherwise the ports are listed and the user picks one by number;
/// an empty answer picks `last` when it is among them. Returns `None` when
/// there are no ports or input ends.
pub fn choose_port<R: BufRead, W: Write>(
    ports: &[String],
    last: Option<&str>,
    mut input: R,
    mut output: W,
) -> Result<Option<String>> {
    match ports {
        [] => {
            writeln!(output, "No ports found")?;
            return Ok(None);
        }
        [only] => return Ok(Some(only.clone())),
        _ => {}
    }

    let remembered = last.filter(|l| ports.iter().any(|p| p == l));

    writeln!(output, "Available ports:")?;
    for (index, port) in ports.iter().enumerate() {
        let marker = if Some(port.as_str()) == remembered {
            " (last used)"
        } else {
            ""
        };
        writeln!(output, "  {}: {}{}", index, port, marker)?;
    }

    loop {
        write!(output, "select: ")?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(None);
        }

        let answer = answer.trim();
        if answer.is_empty() {
            if let Some(last) = remembered {
                return Ok(Some(last.to_string()));
            }
            continue;
        }
        match answer.parse::<usize>().ok().and_then(|i| ports.get(i)) {
            Some(port) => return Ok(Some(port.clone())),
            None => writeln!(output, "Invalid selection '{}'", answer)?,
        }
    }
}
