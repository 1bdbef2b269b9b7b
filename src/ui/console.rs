//! Line-oriented operator console over stdin.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::engine::{EngineCommand, Session};

pub const HELP: &str = "\
commands:
  start | force | pause
  load <url>
  vol <0..1>
  bypass on|off
  tone
  vote <mood>
  weights <source>=<w> ...
  override on|off [<mood>=<v> ...]
  send <type> [<json>]
  status | help | quit";

#[derive(Debug, PartialEq)]
pub enum ConsoleInput {
    Command(EngineCommand),
    Status,
    Help,
    Quit,
    Empty,
}

fn parse_on_off(word: Option<&str>) -> Result<bool> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        other => bail!("expected on|off, got {:?}", other.unwrap_or("")),
    }
}

fn parse_pairs<'a>(words: impl Iterator<Item = &'a str>) -> Result<BTreeMap<String, f64>> {
    let mut map = BTreeMap::new();
    for word in words {
        let (key, value) = word
            .split_once('=')
            .with_context(|| format!("expected key=value, got {word:?}"))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("invalid number in {word:?}"))?;
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

pub fn parse_line(line: &str) -> Result<ConsoleInput> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleInput::Empty);
    };

    let command = match verb {
        "start" | "play" => EngineCommand::Start,
        "force" => EngineCommand::ForcePlay,
        "pause" => EngineCommand::Pause,
        "load" => EngineCommand::Load(words.next().context("usage: load <url>")?.to_string()),
        "vol" | "volume" => {
            let level = words.next().context("usage: vol <0..1>")?;
            EngineCommand::SetVolume(level.parse().context("invalid volume")?)
        }
        "bypass" => EngineCommand::SetBypass(parse_on_off(words.next())?),
        "tone" => EngineCommand::TestTone,
        "vote" => EngineCommand::Vote(words.next().context("usage: vote <mood>")?.to_string()),
        "weights" => {
            let weights = parse_pairs(words)?;
            if weights.is_empty() {
                bail!("usage: weights <source>=<w> ...");
            }
            EngineCommand::Weights(weights)
        }
        "override" => EngineCommand::ManualOverride {
            active: parse_on_off(words.next())?,
            vector: parse_pairs(words)?,
        },
        "send" => {
            let kind = words.next().context("usage: send <type> [<json>]")?;
            let rest = line
                .splitn(3, char::is_whitespace)
                .nth(2)
                .map(str::trim)
                .unwrap_or("");
            let payload = if rest.is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(rest).context("invalid JSON payload")?
            };
            EngineCommand::Control {
                kind: kind.to_string(),
                payload,
            }
        }
        "status" => return Ok(ConsoleInput::Status),
        "help" | "?" => return Ok(ConsoleInput::Help),
        "quit" | "exit" => return Ok(ConsoleInput::Quit),
        other => bail!("unknown command {other:?} (try help)"),
    };
    Ok(ConsoleInput::Command(command))
}

/// Reads commands until `quit` or end of input.
pub fn run(session: &Session) -> Result<()> {
    println!("{HELP}");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match parse_line(&line) {
            Ok(ConsoleInput::Command(command)) => session.send(command)?,
            Ok(ConsoleInput::Status) => println!("{}", session.status().summary()),
            Ok(ConsoleInput::Help) => println!("{HELP}"),
            Ok(ConsoleInput::Quit) => break,
            Ok(ConsoleInput::Empty) => {}
            Err(e) => warn!("{e:#}"),
        }
    }
    info!("Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(line: &str) -> EngineCommand {
        match parse_line(line).unwrap() {
            ConsoleInput::Command(command) => command,
            other => panic!("expected a command, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_verbs() {
        assert_eq!(command("start"), EngineCommand::Start);
        assert_eq!(command("  force "), EngineCommand::ForcePlay);
        assert_eq!(command("pause"), EngineCommand::Pause);
        assert_eq!(command("vol 0.25"), EngineCommand::SetVolume(0.25));
        assert_eq!(command("bypass on"), EngineCommand::SetBypass(true));
        assert_eq!(command("tone"), EngineCommand::TestTone);
        assert_eq!(command("vote joy"), EngineCommand::Vote("joy".into()));
        assert_eq!(parse_line("").unwrap(), ConsoleInput::Empty);
        assert_eq!(parse_line("quit").unwrap(), ConsoleInput::Quit);
    }

    #[test]
    fn test_pairs() {
        let EngineCommand::Weights(weights) = command("weights face=0.5 speech=0.3") else {
            panic!("expected weights");
        };
        assert_eq!(weights["face"], 0.5);
        assert_eq!(weights["speech"], 0.3);

        assert_eq!(
            command("override on sadness=0.8"),
            EngineCommand::ManualOverride {
                active: true,
                vector: BTreeMap::from([("sadness".to_string(), 0.8)]),
            }
        );
        assert_eq!(
            command("override off"),
            EngineCommand::ManualOverride {
                active: false,
                vector: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_send_payload() {
        assert_eq!(
            command(r#"send set_source_mode {"mode": "demo"}"#),
            EngineCommand::Control {
                kind: "set_source_mode".into(),
                payload: json!({"mode": "demo"}),
            }
        );
        assert_eq!(
            command("send ping"),
            EngineCommand::Control {
                kind: "ping".into(),
                payload: json!({}),
            }
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_line("vol loud").is_err());
        assert!(parse_line("bypass maybe").is_err());
        assert!(parse_line("weights face").is_err());
        assert!(parse_line("weights").is_err());
        assert!(parse_line("send x {nope").is_err());
        assert!(parse_line("dance").is_err());
    }
}
