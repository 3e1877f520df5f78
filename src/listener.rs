/*
 * Copyright (C) 2020-2021 Fanout, Inc.
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

use crate::core::channel;
use crate::core::eventloop::AcceptItem;
use log::{debug, error};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const EVENTS_MAX: usize = 128;

const STOP_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);

pub fn set_socket_opts(stream: &mut TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        error!("set nodelay failed: {:?}", e);
    }

    if let Err(e) = SockRef::from(&*stream).set_keepalive(true) {
        error!("set keepalive failed: {:?}", e);
    }
}

// Accepts connections on a dedicated thread and passes them to the event
// loop through its accept queue. Sending blocks while the queue is full, so
// connections wait in the listen backlog until the loop catches up.
pub struct Listener {
    thread: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    waker: Waker,
    addr: SocketAddr,
}

impl Listener {
    pub fn new(
        mut listener: TcpListener,
        sender: channel::Sender<AcceptItem>,
    ) -> Result<Listener, io::Error> {
        let addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), STOP_TOKEN)?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let stop = Arc::clone(&stop);

            thread::Builder::new()
                .name("listener".to_string())
                .spawn(move || Self::run(poll, listener, sender, stop))?
        };

        Ok(Self {
            thread: Some(thread),
            stop,
            waker,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    // asks the accept thread to exit. Drop waits for it
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Err(e) = self.waker.wake() {
            error!("failed to wake listener: {}", e);
        }
    }

    fn run(
        mut poll: Poll,
        listener: TcpListener,
        sender: channel::Sender<AcceptItem>,
        stop: Arc<AtomicBool>,
    ) {
        let mut events = Events::with_capacity(EVENTS_MAX);

        'poll: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                error!("listener poll failed: {}", e);
                break;
            }

            if stop.load(Ordering::Relaxed) {
                break;
            }

            if !events.iter().any(|e| e.token() == LISTENER_TOKEN) {
                continue;
            }

            loop {
                let (mut stream, peer_addr) = match listener.accept() {
                    Ok(ret) => ret,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("accept error: {:?}", e);
                        break;
                    }
                };

                debug!("accepted connection from {}", peer_addr);

                set_socket_opts(&mut stream);

                if sender.send((stream, peer_addr)).is_err() {
                    // this could happen during shutdown
                    debug!("receiver disconnected");
                    break 'poll;
                }
            }
        }

        debug!("listener stopped");
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("listener thread panicked");
            }
        }
    }
}
