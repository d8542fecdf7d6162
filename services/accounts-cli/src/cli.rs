//! Command-line parsing

use std::fmt::Display;
use std::str::FromStr;

use antigravity_pool::{HeaderStyle, ModelFamily, SwitchReason};

use crate::error::{Error, Result};

pub const USAGE: &str = "\
usage: antigravity-accounts [--config PATH] <command> [args]

commands:
  list
  select <claude|gemini> [--model M]
  mark-limited <index> <claude|gemini> [--retry-after-ms N]
               [--header-style antigravity|gemini-cli] [--model M]
  switch <index> <claude|gemini> [--reason rate-limit|initial|rotation]
  remove <index>
  wait <claude|gemini>
  migrate
  clear
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Select {
        family: ModelFamily,
        model: Option<String>,
    },
    MarkLimited {
        index: usize,
        family: ModelFamily,
        /// Falls back to `[rotation] default_retry_after_ms` when absent.
        retry_after_ms: Option<i64>,
        header_style: HeaderStyle,
        model: Option<String>,
    },
    Switch {
        index: usize,
        family: ModelFamily,
        reason: SwitchReason,
    },
    Remove {
        index: usize,
    },
    Wait {
        family: ModelFamily,
    },
    Migrate,
    Clear,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::List => "list",
            Command::Select { .. } => "select",
            Command::MarkLimited { .. } => "mark-limited",
            Command::Switch { .. } => "switch",
            Command::Remove { .. } => "remove",
            Command::Wait { .. } => "wait",
            Command::Migrate => "migrate",
            Command::Clear => "clear",
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: Option<String>,
    pub command: Command,
}

/// Parse arguments (without the program name).
///
/// Options take exactly one value and may appear anywhere; `--config` is
/// accepted with every command.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Invocation> {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut options = Options::default();
    let mut help = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            help = true;
        } else if let Some(name) = arg.strip_prefix("--") {
            let value = args
                .next()
                .ok_or_else(|| Error::Usage(format!("option --{name} needs a value")))?;
            if name == "config" {
                config_path = Some(value);
            } else {
                options.0.push((name.to_string(), value));
            }
        } else {
            positional.push(arg);
        }
    }

    if help {
        return Ok(Invocation {
            config_path,
            command: Command::Help,
        });
    }

    let (name, rest) = positional
        .split_first()
        .ok_or_else(|| Error::Usage("missing command".into()))?;

    let command = match (name.as_str(), rest) {
        ("help", []) => Command::Help,
        ("list", []) => Command::List,
        ("select", [family]) => Command::Select {
            family: value("family", family)?,
            model: options.take("model"),
        },
        ("mark-limited", [index, family]) => Command::MarkLimited {
            index: value("index", index)?,
            family: value("family", family)?,
            retry_after_ms: options.parse("retry-after-ms")?,
            header_style: options.parse("header-style")?.unwrap_or_default(),
            model: options.take("model"),
        },
        ("switch", [index, family]) => Command::Switch {
            index: value("index", index)?,
            family: value("family", family)?,
            reason: options.parse("reason")?.unwrap_or(SwitchReason::Rotation),
        },
        ("remove", [index]) => Command::Remove {
            index: value("index", index)?,
        },
        ("wait", [family]) => Command::Wait {
            family: value("family", family)?,
        },
        ("migrate", []) => Command::Migrate,
        ("clear", []) => Command::Clear,
        (
            "help" | "list" | "select" | "mark-limited" | "switch" | "remove" | "wait" | "migrate"
            | "clear",
            _,
        ) => return Err(Error::Usage(format!("wrong arguments for '{name}'"))),
        (other, _) => return Err(Error::Usage(format!("unknown command '{other}'"))),
    };

    options.finish()?;
    Ok(Invocation {
        config_path,
        command,
    })
}

fn value<T>(what: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| Error::Usage(format!("invalid {what} '{raw}': {e}")))
}

/// `--name value` pairs not yet claimed by a command.
#[derive(Debug, Default)]
struct Options(Vec<(String, String)>);

impl Options {
    fn take(&mut self, name: &str) -> Option<String> {
        let position = self.0.iter().position(|(key, _)| key == name)?;
        Some(self.0.remove(position).1)
    }

    fn parse<T>(&mut self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.take(name).map(|raw| value(name, &raw)).transpose()
    }

    fn finish(self) -> Result<()> {
        match self.0.first() {
            Some((name, _)) => Err(Error::Usage(format!("unexpected option --{name}"))),
            None => Ok(()),
        }
    }
}
