/*
 * Copyright (C) 2023 Fanout, Inc.
 * Copyright (C) 2026 Fastly, Inc.
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

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str;
use std::sync::{Mutex, OnceLock};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const TIMESTAMP_SIZE_MAX: usize = 64;

enum Output<'a> {
    Stdout(io::StdoutLock<'a>),
    File(&'a Mutex<File>),
}

impl Output<'_> {
    fn write_line(&mut self, line: &[u8]) -> Result<(), io::Error> {
        match self {
            Self::Stdout(out) => out.write_all(line),
            Self::File(f) => match f.lock() {
                Ok(mut f) => f.write_all(line),
                Err(_) => Err(io::Error::new(io::ErrorKind::Other, "log file lock poisoned")),
            },
        }
    }
}

pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

// 0=error, 1=warn, 2=info, 3=debug, 4 and up=trace
pub fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        4..=u8::MAX => LevelFilter::Trace,
    }
}

pub struct SimpleLogger {
    local_offset: Option<UtcOffset>,
    output_file: Option<Mutex<File>>,
}

impl SimpleLogger {
    fn format_line(&self, now: OffsetDateTime, record: &Record) -> Vec<u8> {
        let format = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );

        let mut ts = [0u8; TIMESTAMP_SIZE_MAX];

        let size = {
            let mut ts = io::Cursor::new(&mut ts[..]);

            match now.format_into(&mut ts, &format) {
                Ok(_) => ts.position() as usize,
                Err(_) => 0,
            }
        };

        let ts = str::from_utf8(&ts[..size]).unwrap_or("");

        let mut line = Vec::new();

        // writing to a vec can't fail
        let _ = writeln!(
            &mut line,
            "[{}] {} [{}] {}",
            level_name(record.level()),
            ts,
            record.target(),
            record.args()
        );

        line
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = OffsetDateTime::now_utc().to_offset(self.local_offset.unwrap_or(UtcOffset::UTC));

        let line = self.format_line(now, record);

        let stdout = io::stdout();

        let mut output = match &self.output_file {
            Some(f) => Output::File(f),
            None => Output::Stdout(stdout.lock()),
        };

        // nowhere left to report a failure
        let _ = output.write_line(&line);
    }

    fn flush(&self) {
        match &self.output_file {
            Some(f) => {
                if let Ok(mut f) = f.lock() {
                    let _ = f.flush();
                }
            }
            None => {
                let _ = io::stdout().flush();
            }
        }
    }
}

// SAFETY: this method is unsound on platforms where another thread may
// modify environment vars
unsafe fn get_offset() -> Option<UtcOffset> {
    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound);

    let offset = UtcOffset::current_local_offset().ok();

    time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Sound);

    offset
}

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

pub fn open_log_file(path: &Path) -> Result<File, io::Error> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// Sets up the process-wide logger. Only the first call has any effect, so
/// the output must be decided before anything logs.
pub fn ensure_init_simple_logger(output_file: Option<File>) {
    LOGGER.get_or_init(|| {
        // SAFETY: we accept that this call is unsound. on some platforms it
        // is the only way to know the time zone, with a chance of UB if
        // another thread modifies environment vars during the call. it
        // happens once, before any other threads are started
        let local_offset = unsafe { get_offset() };

        SimpleLogger {
            local_offset,
            output_file: output_file.map(Mutex::new),
        }
    });
}

pub fn get_simple_logger() -> &'static SimpleLogger {
    LOGGER.get_or_init(|| SimpleLogger {
        local_offset: None,
        output_file: None,
    })
}

pub fn local_offset_check() {
    if get_simple_logger().local_offset.is_none() {
        log::warn!("failed to determine local time offset, log timestamps will be in UTC");
    }
}
