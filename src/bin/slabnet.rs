/*
 * Copyright (C) 2023 Fastly, Inc.
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


use clap::Parser;
use log::info;
use slabnet::cliargs::CliArgs;
use slabnet::config::Config;
use slabnet::log::{
    ensure_init_simple_logger, get_simple_logger, level_filter, local_offset_check, open_log_file,
};
use std::error::Error;
use std::process;

fn process_args_and_run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    let log_file = match &args.logfile {
        Some(path) => match open_log_file(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!(
                    "unable to open log file {}: {}. logging to standard out.",
                    path.display(),
                    e
                );
                None
            }
        },
        None => None,
    };

    ensure_init_simple_logger(log_file);
    if let Err(e) = log::set_logger(get_simple_logger()) {
        return Err(format!("failed to set logger: {}", e).into());
    }

    log::set_max_level(level_filter(args.log_level()));

    local_offset_check();

    let mut config = Config::new(args.config.as_deref())?;
    args.apply(&mut config)?;

    match &args.config {
        Some(path) => info!("using config: {}", path.display()),
        None => info!("using default config"),
    }

    slabnet::run(&config)
}

fn main() {
    let args = CliArgs::parse();

    if let Err(e) = process_args_and_run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
