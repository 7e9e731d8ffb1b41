//! Console commands read from stdin
//!
//! ```text
//! read <variable> [length] [#id]
//! write <variable> <value> [#id]
//! pause <ms>
//! handles | state | help | quit
//! ```

use ads_rx::{AdsRxClient, PlcValue};
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

pub const HELP: &str = "\
Commands:
  read <variable> [length] [#id]   request a read, the value shows up on the data stream
  write <variable> <value> [#id]   request a write, the outcome shows up as an ack
  pause <ms>                       pause the client for the given time
  handles                          list registered handles
  state                            show the supervisor state
  quit                             disconnect and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Read {
        variable: String,
        length: Option<usize>,
        id: Option<String>,
    },
    Write {
        variable: String,
        value: String,
        id: Option<String>,
    },
    Pause(Duration),
    Handles,
    State,
    Help,
    Quit,
}

/// Split a trailing `#id` token off the arguments
fn split_id(rest: &str) -> (&str, Option<String>) {
    let rest = rest.trim();
    match rest.rsplit_once(char::is_whitespace) {
        Some((head, last)) if last.len() > 1 && last.starts_with('#') => {
            (head.trim_end(), Some(last[1..].to_string()))
        },
        None if rest.len() > 1 && rest.starts_with('#') => ("", Some(rest[1..].to_string())),
        _ => (rest, None),
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match verb.to_ascii_lowercase().as_str() {
            "read" | "r" => {
                let (args, id) = split_id(rest);
                let mut args = args.split_whitespace();
                let variable = args
                    .next()
                    .context("usage: read <variable> [length] [#id]")?
                    .to_string();
                let length = args
                    .next()
                    .map(str::parse::<usize>)
                    .transpose()
                    .context("length must be a number")?;
                Ok(Self::Read {
                    variable,
                    length,
                    id,
                })
            },
            "write" | "w" => {
                let (args, id) = split_id(rest);
                let Some((variable, value)) = args.split_once(char::is_whitespace) else {
                    bail!("usage: write <variable> <value> [#id]");
                };
                Ok(Self::Write {
                    variable: variable.to_string(),
                    value: value.trim().to_string(),
                    id,
                })
            },
            "pause" => {
                let ms: u64 = rest.trim().parse().context("usage: pause <ms>")?;
                Ok(Self::Pause(Duration::from_millis(ms)))
            },
            "handles" => Ok(Self::Handles),
            "state" => Ok(Self::State),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => bail!("unknown command '{}', try 'help'", other),
        }
    }
}

/// Best guess for variables without a registered type
fn guess_value(text: &str) -> PlcValue {
    let text = text.trim();
    if let Ok(b) = text.parse::<bool>() {
        return PlcValue::Bool(b);
    }
    if let Ok(i) = text.parse::<i32>() {
        return PlcValue::DInt(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return PlcValue::LReal(f);
    }
    serde_json::from_str(text).unwrap_or_else(|_| PlcValue::String(text.to_string()))
}

/// Run one command; `Ok(false)` asks the console to exit
pub fn execute(client: &AdsRxClient, command: Command) -> Result<bool> {
    match command {
        Command::Read {
            variable,
            length,
            id,
        } => client.read(&variable, length, id.as_deref()),
        Command::Write {
            variable,
            value,
            id,
        } => {
            let value = match client.variable_type(&variable) {
                Some(ty) => ty.parse_value(&value)?,
                None => guess_value(&value),
            };
            client.write(&variable, value, id.as_deref());
        },
        Command::Pause(duration) => client.pause(duration),
        Command::Handles => {
            let info = client.handle_info();
            let mut rows: Vec<_> = info
                .read_write
                .iter()
                .map(|(path, handle)| (path.clone(), "read-write", *handle))
                .chain(
                    info.write_only
                        .iter()
                        .map(|(path, entry)| (path.clone(), "write-only", entry.handle)),
                )
                .collect();
            rows.sort();
            for (path, kind, handle) in rows {
                match handle {
                    Some(h) => println!("{:<32} {:<10} {:#06x}", path, kind, h),
                    None => println!("{:<32} {:<10} -", path, kind),
                }
            }
        },
        Command::State => println!(
            "state: {} (connected: {}, paused: {})",
            client.current_state(),
            client.is_connected(),
            client.is_paused()
        ),
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
