/*
 * Copyright (C) 2024 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::config::Config;
use clap::{ArgAction, Parser};
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_LOG_LEVEL: u8 = 2;

#[derive(Parser, Clone, Debug)]
#[command(
    name = "slabnet",
    version,
    about = "Non-blocking TCP server with a tiered message arena."
)]
pub struct CliArgs {
    #[arg(long, value_name = "file", help = "Config file (INI).")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "file", help = "File to log to.")]
    pub logfile: Option<PathBuf>,

    #[arg(
        short = 'L',
        long,
        value_name = "x",
        value_parser = clap::value_parser!(u8).range(0..=4),
        help = "Log level, 0=error to 4=trace (default: 2)."
    )]
    pub loglevel: Option<u8>,

    #[arg(long, action=ArgAction::SetTrue, help = "Verbose output. Same as --loglevel=3.")]
    pub verbose: bool,

    #[arg(
        long,
        value_name = "[addr:]port",
        help = "Listen on this port, overriding the config."
    )]
    pub port: Option<String>,
}

impl CliArgs {
    pub fn log_level(&self) -> u8 {
        match self.loglevel {
            Some(x) => x,
            None if self.verbose => 3,
            None => DEFAULT_LOG_LEVEL,
        }
    }

    /// Parses `--port`. The address is `None` if only a port was given.
    pub fn listen(&self) -> Result<Option<(Option<IpAddr>, u16)>, Box<dyn Error>> {
        let value = match self.port.as_deref() {
            Some(x) if !x.is_empty() => x,
            _ => return Ok(None),
        };

        if !value.contains(':') {
            return match value.parse::<u16>() {
                Ok(port) => Ok(Some((None, port))),
                Err(_) => Err(format!("invalid port {:?}", value).into()),
            };
        }

        match value.parse::<SocketAddr>() {
            Ok(addr) => Ok(Some((Some(addr.ip()), addr.port()))),
            Err(e) => Err(format!("error parsing port {:?}: {}", value, e).into()),
        }
    }

    /// Applies command line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut Config) -> Result<(), Box<dyn Error>> {
        if let Some((addr, port)) = self.listen()? {
            if let Some(addr) = addr {
                config.server.listen_addr = addr;
            }

            config.server.port = port;
        }

        Ok(())
    }
}
