/*
 * Copyright (C) 2020-2023 Fanout, Inc.
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

use crate::config::Config;
use crate::core::eventloop::{EventLoop, MessageProcessor, StopHandle};
use crate::http1::reader::HttpMessageReader;
use crate::listener::Listener;
use log::{error, info};
use mio::net::TcpListener;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Signals;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

pub struct App {
    listener: Option<Listener>,
    stop: StopHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl App {
    pub fn new<P>(config: &Config, processor: P) -> Result<Self, String>
    where
        P: MessageProcessor + Send + 'static,
    {
        if let Err(e) = config.validate() {
            return Err(format!("invalid config: {}", e));
        }

        let addr = config.listen_addr();

        let listener = match TcpListener::bind(addr) {
            Ok(l) => l,
            Err(e) => return Err(format!("failed to bind {}: {}", addr, e)),
        };

        let mut event_loop: EventLoop<HttpMessageReader, P> =
            match EventLoop::new(&config.event_loop_config(), processor) {
                Ok(el) => el,
                Err(e) => return Err(format!("failed to create event loop: {}", e)),
            };

        let stop = event_loop.stop_handle();
        let accept_sender = event_loop.accept_sender();

        let thread = match thread::Builder::new()
            .name("event-loop".to_string())
            .spawn(move || event_loop.run())
        {
            Ok(t) => t,
            Err(e) => return Err(format!("failed to spawn event loop thread: {}", e)),
        };

        let mut app = Self {
            listener: None,
            stop,
            thread: Some(thread),
        };

        let listener = match Listener::new(listener, accept_sender) {
            Ok(l) => l,
            Err(e) => return Err(format!("failed to start listener: {}", e)),
        };

        info!("listening on {}", listener.local_addr());

        app.listener = Some(listener);

        Ok(app)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr())
    }

    pub fn wait_for_term(&self) -> Result<(), io::Error> {
        let mut signals = Signals::new(TERM_SIGNALS)?;

        let term_now = Arc::new(AtomicBool::new(false));

        // ensure two term signals in a row causes the app to immediately exit
        for signal_type in TERM_SIGNALS {
            signal_hook::flag::register_conditional_shutdown(
                *signal_type,
                1, // exit code
                Arc::clone(&term_now),
            )?;

            signal_hook::flag::register(*signal_type, Arc::clone(&term_now))?;
        }

        // wait for termination
        if let Some(signal) = signals.forever().next() {
            info!("received signal {}", signal);
        }

        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        // no new connections. a listener blocked on a full accept queue is
        // released once the loop exits and drops the receiving end
        if let Some(l) = &self.listener {
            l.stop();
        }

        self.stop.stop();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("event loop thread panicked");
            }
        }

        self.listener = None;
    }
}
