// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Deserialize;
use std::{fs, path::PathBuf};

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lmtp: Lmtp,
    pub spool: Spool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Lmtp {
    /// Path of the UNIX socket; must not exist when the server is created
    pub socket: PathBuf,
    /// Permission bits applied to the socket after binding
    pub mode: Option<u32>,
    /// Idle timeout for each line read, in seconds
    pub timeout: u64,
    /// Name announced in replies, defaults to the system host name
    pub hostname: Option<String>,
    /// Additional extensions announced in response to LHLO
    pub extensions: Vec<String>,
    pub success_message: String,
}

impl Default for Lmtp {
    fn default() -> Self {
        Lmtp {
            socket: PathBuf::from("lmtp.sock"),
            mode: None,
            timeout: 30,
            hostname: None,
            extensions: Vec::new(),
            success_message: "Message accepted for delivery.".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Spool {
    pub directory: PathBuf,
}

impl Default for Spool {
    fn default() -> Self {
        Spool { directory: PathBuf::from("spool") }
    }
}

/// LMTP server delivering into a spool directory
#[derive(FromArgs)]
struct Args {
    /// configuration file to use
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// path of the UNIX socket to listen on
    #[argh(option)]
    socket: Option<PathBuf>,
    /// octal permission bits for the socket, e.g. 660
    #[argh(option)]
    mode: Option<String>,
    /// idle timeout in seconds
    #[argh(option)]
    timeout: Option<u64>,
    /// directory to deliver messages into
    #[argh(option)]
    spool: Option<PathBuf>,
}

pub fn load() -> Result<Config> {
    let args: Args = argh::from_env();

    let mut config = match args.config {
        None => Config::default(),
        Some(path) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("could not read {}", path.display()))?;
            parse(&data)?
        }
    };

    if let Some(socket) = args.socket {
        config.lmtp.socket = socket;
    }

    if let Some(mode) = args.mode {
        config.lmtp.mode = Some(parse_mode(&mode)?);
    }

    if let Some(timeout) = args.timeout {
        config.lmtp.timeout = timeout;
    }

    if let Some(directory) = args.spool {
        config.spool.directory = directory;
    }

    Ok(config)
}

pub fn parse(data: &str) -> Result<Config> {
    toml::from_str(data).context("invalid configuration file")
}

/// Parse permission bits written in octal, with or without a `0o` prefix
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("invalid socket mode {mode:?}"))?;

    anyhow::ensure!(mode <= 0o7777, "socket mode {mode:o} out of range");
    Ok(mode)
}
