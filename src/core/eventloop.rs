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

use crate::core::arena::{ArenaError, ArenaSizing, TieredArena};
use crate::core::buffer::Buffer;
use crate::core::channel::{self, Receiver, Sender};
use crate::core::event::Poller;
use crate::core::message::Message;
use crate::core::reader::MessageReader;
use crate::core::writer::OutboundWriter;
use log::{debug, error, info, warn};
use mio::net::TcpStream;
use mio::{Interest, Token};
use slab::Slab;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub const FIRST_CONNECTION_ID: u64 = 16 * 1024;

// an accepted connection and its peer address
pub type AcceptItem = (TcpStream, SocketAddr);

/// Consumes complete inbound messages.
///
/// Called on the event loop thread. The message and its bytes are only
/// borrowed: the loop gives the slot back to the read arena once `process`
/// returns. Responses are allocated, filled and enqueued through the
/// [`WriteProxy`].
pub trait MessageProcessor {
    fn process(&mut self, msg: &Message, data: &[u8], proxy: &mut WriteProxy<'_>);
}

impl<F> MessageProcessor for F
where
    F: FnMut(&Message, &[u8], &mut WriteProxy<'_>),
{
    fn process(&mut self, msg: &Message, data: &[u8], proxy: &mut WriteProxy<'_>) {
        self(msg, data, proxy)
    }
}

/// Outbound side of the loop, as seen by a processor handling a message from
/// one connection.
pub struct WriteProxy<'a> {
    arena: &'a mut TieredArena,
    sender: &'a Sender<Message>,
    conn_id: u64,
}

impl<'a> WriteProxy<'a> {
    pub(crate) fn new(arena: &'a mut TieredArena, sender: &'a Sender<Message>, conn_id: u64) -> Self {
        Self {
            arena,
            sender,
            conn_id,
        }
    }

    /// Id of the connection the message being processed came from.
    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    /// Takes an empty message from the write arena, addressed to the
    /// connection being served. `None` if the arena is exhausted.
    pub fn allocate(&mut self) -> Option<Message> {
        let mut msg = self.arena.acquire()?;

        msg.set_connection_id(self.conn_id);

        Some(msg)
    }

    /// Appends as much of `src` as fits, growing the message as needed.
    pub fn write(&mut self, msg: &mut Message, src: &[u8]) -> Result<usize, ArenaError> {
        self.arena.append(msg, src)
    }

    /// Appends all of `src`, or fails if the message can't hold it. On
    /// failure a prefix of `src` may have been written.
    pub fn write_all(&mut self, msg: &mut Message, src: &[u8]) -> Result<(), ArenaError> {
        let size = self.arena.append(msg, src)?;

        if size < src.len() {
            return Err(if msg.tier().next().is_none() {
                ArenaError::TooLarge
            } else {
                ArenaError::Exhausted
            });
        }

        Ok(())
    }

    /// Queues a message for sending to the connection it is addressed to.
    /// Returns false if the outbound queue is full, in which case the message
    /// is released.
    pub fn enqueue(&mut self, msg: Message) -> bool {
        match self.sender.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(msg)) | Err(mpsc::TrySendError::Disconnected(msg)) => {
                warn!(
                    "conn {}: outbound queue full, dropping message",
                    msg.connection_id()
                );

                self.arena.release(msg);

                false
            }
        }
    }

    /// Gives an unsent message back to the write arena.
    pub fn release(&mut self, msg: Message) {
        self.arena.release(msg);
    }

    /// A sender for enqueuing messages later, possibly from another thread.
    /// Only messages allocated through a proxy may be sent.
    pub fn sender(&self) -> Sender<Message> {
        self.sender.clone()
    }
}

#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    pub accept_queue_max: usize,
    pub outbound_queue_max: usize,
    pub connections_max: usize,
    pub read_buffer_size: usize,
    pub idle_timeout: Duration,
    pub read_arena: ArenaSizing,
    pub write_arena: ArenaSizing,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            accept_queue_max: 1024,
            outbound_queue_max: 16 * 1024,
            connections_max: 16 * 1024,
            read_buffer_size: 1024 * 1024,
            idle_timeout: Duration::from_millis(100),
            read_arena: ArenaSizing::default(),
            write_arena: ArenaSizing::default(),
        }
    }
}

#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Err(e) = self.waker.wake() {
            error!("failed to wake event loop: {}", e);
        }
    }
}

struct Connection<R> {
    id: u64,
    stream: TcpStream,
    reader: R,
    writer: OutboundWriter,
    read_ready: bool,
    write_ready: bool,

    // whether the stream is registered for writability in addition to
    // readability. only while the writer has something queued
    write_registered: bool,
}

fn conn_token(key: usize) -> Token {
    Token(key + 1)
}

/// Multiplexes reading, processing and writing for many connections on one
/// thread.
///
/// Each [`step`](EventLoop::step) takes in newly accepted connections, reads
/// once from every connection with data available, hands each complete
/// message to the processor, routes the processor's responses to their
/// connections, and writes to every connection that can take more data.
/// Inbound messages live in the read arena and outbound messages in the write
/// arena, both owned by the loop.
pub struct EventLoop<R, P> {
    poller: Poller,
    conns: Slab<Connection<R>>,
    ids: HashMap<u64, usize>,
    next_id: u64,
    connections_max: usize,
    read_arena: TieredArena,
    write_arena: TieredArena,
    scratch: Buffer,
    accept_sender: Sender<AcceptItem>,
    accept_receiver: Receiver<AcceptItem>,
    outbound_sender: Sender<Message>,
    outbound_receiver: Receiver<Message>,
    processor: P,
    inbound: Vec<Message>,
    readable: Vec<usize>,
    writable: Vec<usize>,
    pending: Vec<usize>,
    polled: bool,
    idle_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl<R, P> EventLoop<R, P>
where
    R: MessageReader + Default,
    P: MessageProcessor,
{
    pub fn new(config: &EventLoopConfig, processor: P) -> Result<Self, io::Error> {
        let read_arena = TieredArena::new(&config.read_arena).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("read arena: {}", e))
        })?;

        let write_arena = TieredArena::new(&config.write_arena).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("write arena: {}", e))
        })?;

        let poller = Poller::new()?;

        let (accept_sender, accept_receiver) =
            channel::channel(config.accept_queue_max, Arc::clone(poller.waker()));

        let (outbound_sender, outbound_receiver) =
            channel::channel(config.outbound_queue_max, Arc::clone(poller.waker()));

        Ok(Self {
            poller,
            conns: Slab::new(),
            ids: HashMap::new(),
            next_id: FIRST_CONNECTION_ID,
            connections_max: config.connections_max,
            read_arena,
            write_arena,
            scratch: Buffer::new(config.read_buffer_size),
            accept_sender,
            accept_receiver,
            outbound_sender,
            outbound_receiver,
            processor,
            inbound: Vec::new(),
            readable: Vec::new(),
            writable: Vec::new(),
            pending: Vec::new(),
            polled: false,
            idle_timeout: config.idle_timeout,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn accept_sender(&self) -> Sender<AcceptItem> {
        self.accept_sender.clone()
    }

    pub fn outbound_sender(&self) -> Sender<Message> {
        self.outbound_sender.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(self.poller.waker()),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn read_arena(&self) -> &TieredArena {
        &self.read_arena
    }

    pub fn write_arena(&self) -> &TieredArena {
        &self.write_arena
    }

    /// Runs steps until stopped, waiting in the poller whenever a step finds
    /// nothing to do. Closes all connections before returning.
    pub fn run(&mut self) {
        info!("event loop started");

        while !self.stop.load(Ordering::Relaxed) {
            if !self.step() {
                self.wait(self.idle_timeout);
            }
        }

        self.shutdown();

        info!("event loop stopped");
    }

    /// Performs one round of accepting, reading, routing and writing. Returns
    /// true if any of it made progress.
    pub fn step(&mut self) -> bool {
        let mut did_work = self.accept_connections();

        self.collect_events();

        did_work |= self.process_reads();
        did_work |= self.route_outbound();
        did_work |= self.process_writes();

        did_work
    }

    /// Blocks until a connection becomes ready, a queue is fed, or the
    /// timeout elapses. The readiness gathered is used by the next step.
    pub fn wait(&mut self, timeout: Duration) {
        match self.poller.poll(Some(timeout)) {
            Ok(()) => self.polled = true,
            Err(e) => error!("poll failed: {}", e),
        }
    }

    /// Closes every connection, and gives back all slots held by readers,
    /// writers and the outbound queue.
    pub fn shutdown(&mut self) {
        let keys: Vec<usize> = self.conns.iter().map(|(key, _)| key).collect();

        for key in keys {
            self.close_connection(key);
        }

        while let Ok(msg) = self.outbound_receiver.try_recv() {
            self.write_arena.release(msg);
        }

        while let Ok((_, peer_addr)) = self.accept_receiver.try_recv() {
            debug!("dropping pending connection from {}", peer_addr);
        }
    }

    fn accept_connections(&mut self) -> bool {
        let mut did_work = false;

        while let Ok((stream, peer_addr)) = self.accept_receiver.try_recv() {
            did_work = true;

            if self.conns.len() >= self.connections_max {
                warn!(
                    "connection limit reached, refusing connection from {}",
                    peer_addr
                );
                continue;
            }

            match self.add_connection(stream) {
                Ok(id) => debug!("conn {}: added, peer {}", id, peer_addr),
                Err(e) => error!("failed to add connection from {}: {}", peer_addr, e),
            }
        }

        did_work
    }

    fn add_connection(&mut self, mut stream: TcpStream) -> Result<u64, io::Error> {
        let entry = self.conns.vacant_entry();
        let key = entry.key();

        self.poller
            .register(&mut stream, conn_token(key), Interest::READABLE)?;

        let id = self.next_id;
        self.next_id += 1;

        // data may have arrived before registration
        entry.insert(Connection {
            id,
            stream,
            reader: R::default(),
            writer: OutboundWriter::new(),
            read_ready: true,
            write_ready: false,
            write_registered: false,
        });

        self.ids.insert(id, key);
        self.readable.push(key);

        Ok(id)
    }

    fn collect_events(&mut self) {
        if !mem::replace(&mut self.polled, false) {
            if let Err(e) = self.poller.poll(Some(Duration::ZERO)) {
                error!("poll failed: {}", e);
                return;
            }
        }

        for event in self.poller.iter_events() {
            let key = event.token.0 - 1;

            let conn = match self.conns.get_mut(key) {
                Some(conn) => conn,
                None => continue,
            };

            if event.readable && !conn.read_ready {
                conn.read_ready = true;
                self.readable.push(key);
            }

            if event.writable && conn.write_registered && !conn.write_ready {
                conn.write_ready = true;
                self.writable.push(key);
            }
        }
    }

    fn process_reads(&mut self) -> bool {
        mem::swap(&mut self.readable, &mut self.pending);

        let mut did_work = false;

        for i in 0..self.pending.len() {
            let key = self.pending[i];

            did_work |= self.read_connection(key);
        }

        self.pending.clear();

        did_work
    }

    fn read_connection(&mut self, key: usize) -> bool {
        let conn = match self.conns.get_mut(key) {
            Some(conn) if conn.read_ready => conn,
            _ => return false,
        };

        let id = conn.id;

        if !conn.reader.prepare(&mut self.read_arena) {
            // leave the bytes in the socket and retry once slots are freed
            self.readable.push(key);

            return false;
        }

        self.scratch.clear();

        match self.scratch.write_from(&mut conn.stream) {
            Ok(0) => {
                debug!("conn {}: closed by peer", id);

                self.close_connection(key);

                return true;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.read_ready = false;

                return false;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.readable.push(key);

                return false;
            }
            Err(e) => {
                debug!("conn {}: read error: {}", id, e);

                self.close_connection(key);

                return true;
            }
        }

        if let Err(e) = conn
            .reader
            .read(self.scratch.read_buf(), &mut self.read_arena)
        {
            debug!("conn {}: closing: {}", id, e);

            self.close_connection(key);

            return true;
        }

        // there may be more to read
        self.readable.push(key);

        mem::swap(&mut self.inbound, conn.reader.messages());

        for mut msg in self.inbound.drain(..) {
            msg.set_connection_id(id);

            let mut proxy = WriteProxy::new(&mut self.write_arena, &self.outbound_sender, id);

            self.processor
                .process(&msg, self.read_arena.data(&msg), &mut proxy);

            self.read_arena.release(msg);
        }

        true
    }

    fn route_outbound(&mut self) -> bool {
        let mut did_work = false;

        while let Ok(msg) = self.outbound_receiver.try_recv() {
            did_work = true;

            let id = msg.connection_id();

            let key = match self.ids.get(&id) {
                Some(key) => *key,
                None => {
                    debug!("conn {}: no such connection, dropping message", id);

                    self.write_arena.release(msg);
                    continue;
                }
            };

            let conn = &mut self.conns[key];

            conn.writer.enqueue(msg);

            if !conn.write_registered {
                if let Err(e) = self.poller.reregister(
                    &mut conn.stream,
                    conn_token(key),
                    Interest::READABLE | Interest::WRITABLE,
                ) {
                    error!("conn {}: failed to register for writing: {}", id, e);

                    self.close_connection(key);
                    continue;
                }

                conn.write_registered = true;

                // the socket is most likely writable, so try without waiting
                // for the event
                if !conn.write_ready {
                    conn.write_ready = true;
                    self.writable.push(key);
                }
            }
        }

        did_work
    }

    fn process_writes(&mut self) -> bool {
        mem::swap(&mut self.writable, &mut self.pending);

        let mut did_work = false;

        for i in 0..self.pending.len() {
            let key = self.pending[i];

            did_work |= self.write_connection(key);
        }

        self.pending.clear();

        did_work
    }

    fn write_connection(&mut self, key: usize) -> bool {
        let conn = match self.conns.get_mut(key) {
            Some(conn) if conn.write_ready => conn,
            _ => return false,
        };

        let id = conn.id;

        let size = match conn.writer.write(&mut conn.stream, &mut self.write_arena) {
            Ok(size) => size,
            Err(e) => {
                debug!("conn {}: write error: {}", id, e);

                self.close_connection(key);

                return true;
            }
        };

        // either drained or blocked. if blocked, the next writable event
        // sets this again
        conn.write_ready = false;

        if conn.writer.is_empty() {
            if let Err(e) =
                self.poller
                    .reregister(&mut conn.stream, conn_token(key), Interest::READABLE)
            {
                error!("conn {}: failed to unregister for writing: {}", id, e);

                self.close_connection(key);

                return true;
            }

            conn.write_registered = false;
        }

        size > 0
    }

    fn close_connection(&mut self, key: usize) {
        let mut conn = match self.conns.try_remove(key) {
            Some(conn) => conn,
            None => return,
        };

        self.ids.remove(&conn.id);

        conn.reader.release(&mut self.read_arena);
        conn.writer.release(&mut self.write_arena);

        if let Err(e) = self.poller.deregister(&mut conn.stream) {
            debug!("conn {}: deregister failed: {}", conn.id, e);
        }

        self.readable.retain(|k| *k != key);
        self.writable.retain(|k| *k != key);

        debug!("conn {}: closed", conn.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::Tier;
    use crate::http1::reader::HttpMessageReader;
    use socket2::SockRef;
    use std::io::{Read, Write};
    use std::thread;
    use test_log::test;

    struct Echo;

    impl MessageProcessor for Echo {
        fn process(&mut self, _msg: &Message, data: &[u8], proxy: &mut WriteProxy<'_>) {
            let mut out = match proxy.allocate() {
                Some(out) => out,
                None => return,
            };

            if proxy.write_all(&mut out, data).is_err() {
                proxy.release(out);
                return;
            }

            proxy.enqueue(out);
        }
    }

    fn echo_fn() -> impl FnMut(&Message, &[u8], &mut WriteProxy<'_>) + Send {
        |msg, data, proxy| Echo.process(msg, data, proxy)
    }

    type TestLoop = EventLoop<HttpMessageReader, Echo>;

    fn config() -> EventLoopConfig {
        let sizing = ArenaSizing {
            small_slot_size: 64,
            small_slots: 8,
            medium_slot_size: 256,
            medium_slots: 4,
            large_slot_size: 1024,
            large_slots: 2,
        };

        EventLoopConfig {
            accept_queue_max: 16,
            outbound_queue_max: 64,
            connections_max: 16,
            read_buffer_size: 4096,
            idle_timeout: Duration::from_millis(10),
            read_arena: sizing.clone(),
            write_arena: sizing,
        }
    }

    fn socket_pair() -> (std::net::TcpStream, AcceptItem) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let (server, peer_addr) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        client
            .set_read_timeout(Some(Duration::from_millis(5000)))
            .unwrap();

        (client, (TcpStream::from_std(server), peer_addr))
    }

    fn assert_all_free(arena: &TieredArena) {
        for tier in Tier::ALL {
            assert_eq!(arena.available(tier), arena.slot_count(tier), "{}", tier);
        }
    }

    // steps until the condition holds
    fn drive<R, P, F>(l: &mut EventLoop<R, P>, mut cond: F)
    where
        R: MessageReader + Default,
        P: MessageProcessor,
        F: FnMut(&EventLoop<R, P>) -> bool,
    {
        for _ in 0..500 {
            if !l.step() {
                l.wait(Duration::from_millis(10));
            }

            if cond(l) {
                return;
            }
        }

        panic!("condition not reached");
    }

    #[test]
    fn request_response_single_step() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();

        let req = b"GET / HTTP/1.1\r\n\r\n";
        client.write_all(req).unwrap();

        // let the bytes land in the server's receive buffer
        thread::sleep(Duration::from_millis(50));

        l.accept_sender().try_send(server).unwrap();

        assert!(l.step());
        assert_eq!(l.connection_count(), 1);

        // read, processed and written back within the step
        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());

        let mut resp = [0; 18];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(&resp, req);
    }

    #[test]
    fn pipelined_responses() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();
        l.accept_sender().try_send(server).unwrap();

        let mut reqs = Vec::new();
        reqs.extend_from_slice(b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        reqs.extend_from_slice(b"GET /b HTTP/1.1\r\n\r\n");
        reqs.extend_from_slice(b"PUT /c HTTP/1.1\r\nContent-Length: 100\r\n\r\n");
        reqs.extend_from_slice(&[b'z'; 100]);
        client.write_all(&reqs).unwrap();

        let mut resp = Vec::new();
        let mut buf = [0; 1024];
        client
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        for _ in 0..500 {
            if !l.step() {
                l.wait(Duration::from_millis(10));
            }

            match client.read(&mut buf) {
                Ok(0) => panic!("unexpected eof"),
                Ok(size) => resp.extend_from_slice(&buf[..size]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => panic!("{}", e),
            }

            if resp.len() >= reqs.len() {
                break;
            }
        }

        assert_eq!(resp, reqs);

        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());
    }

    #[test]
    fn connection_ids() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (_client1, server1) = socket_pair();
        let (_client2, server2) = socket_pair();
        l.accept_sender().try_send(server1).unwrap();
        l.accept_sender().try_send(server2).unwrap();

        l.step();

        let mut ids: Vec<u64> = l.ids.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec![FIRST_CONNECTION_ID, FIRST_CONNECTION_ID + 1]);
    }

    #[test]
    fn connection_limit() {
        let mut config = config();
        config.connections_max = 1;

        let mut l = TestLoop::new(&config, Echo).unwrap();

        let (_client1, server1) = socket_pair();
        let (mut client2, server2) = socket_pair();
        l.accept_sender().try_send(server1).unwrap();
        l.accept_sender().try_send(server2).unwrap();

        l.step();
        assert_eq!(l.connection_count(), 1);

        // the refused connection is dropped
        let mut buf = [0; 16];
        assert_eq!(client2.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn peer_close_releases_slots() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();
        l.accept_sender().try_send(server).unwrap();

        client.write_all(b"GET / HTTP/1.1\r\nHost: exa").unwrap();

        drive(&mut l, |l| l.read_arena().available(Tier::Small) < 8);
        assert_eq!(l.connection_count(), 1);

        drop(client);

        drive(&mut l, |l| l.connection_count() == 0);

        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());
    }

    #[test]
    fn invalid_content_length_closes() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();
        l.accept_sender().try_send(server).unwrap();

        client
            .write_all(b"GET / HTTP/1.1\r\nContent-Length: nope\r\n\r\n")
            .unwrap();

        drive(&mut l, |l| l.connection_count() == 0);

        assert_all_free(l.read_arena());

        let mut buf = [0; 16];
        match client.read(&mut buf) {
            Ok(size) => assert_eq!(size, 0),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn too_large_closes() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();
        l.accept_sender().try_send(server).unwrap();

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4000\r\n\r\n")
            .unwrap();
        client.write_all(&[b'z'; 2000]).unwrap();

        drive(&mut l, |l| l.connection_count() == 0);

        assert_all_free(l.read_arena());
    }

    #[test]
    fn unknown_connection_released() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let mut msg = l.write_arena.acquire().unwrap();
        l.write_arena.append(&mut msg, b"hello").unwrap();
        msg.set_connection_id(12345);

        l.outbound_sender().try_send(msg).unwrap();
        assert_eq!(l.write_arena().available(Tier::Small), 7);

        assert!(l.step());
        assert_all_free(l.write_arena());
    }

    // 32 responses of 64KB each for every request
    fn flood_fn() -> impl FnMut(&Message, &[u8], &mut WriteProxy<'_>) + Send {
        |_msg, _data, proxy| {
            for i in 0..32 {
                let mut out = match proxy.allocate() {
                    Some(out) => out,
                    None => return,
                };

                if proxy.write_all(&mut out, &[b'a' + i; 64 * 1024]).is_err() {
                    proxy.release(out);
                    return;
                }

                proxy.enqueue(out);
            }
        }
    }

    fn write_blocked<R, P>(l: &EventLoop<R, P>) -> bool {
        match l.conns.iter().next() {
            Some((_, conn)) => {
                conn.write_registered && !conn.write_ready && !conn.writer.is_empty()
            }
            None => false,
        }
    }

    #[test]
    fn blocked_write_resumes() {
        let mut config = config();
        config.write_arena.large_slot_size = 64 * 1024;
        config.write_arena.large_slots = 32;

        let mut l = EventLoop::<HttpMessageReader, _>::new(&config, flood_fn()).unwrap();

        let (mut client, server) = socket_pair();

        // keep the kernel from absorbing the whole response
        SockRef::from(&server.0).set_send_buffer_size(16 * 1024).unwrap();
        SockRef::from(&client).set_recv_buffer_size(16 * 1024).unwrap();

        l.accept_sender().try_send(server).unwrap();

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        drive(&mut l, |l| write_blocked(l));

        // stays queued while the peer isn't reading
        for _ in 0..5 {
            l.step();
            l.wait(Duration::from_millis(10));
        }

        assert!(write_blocked(&l));
        assert_eq!(l.connection_count(), 1);
        assert!(l.write_arena().available(Tier::Large) < 32);

        let reader = thread::spawn(move || {
            let mut resp = vec![0; 32 * 64 * 1024];
            client.read_exact(&mut resp).unwrap();

            (client, resp)
        });

        // a writable event per buffer's worth, so give it more rounds
        for _ in 0..10_000 {
            if l.write_arena().available(Tier::Large) == 32 && !write_blocked(&l) {
                break;
            }

            if !l.step() {
                l.wait(Duration::from_millis(10));
            }
        }

        match l.conns.iter().next() {
            Some((_, conn)) => {
                assert!(conn.writer.is_empty());
                assert!(!conn.write_registered);
            }
            None => panic!("connection closed"),
        }

        let (mut client, resp) = reader.join().unwrap();

        for (i, chunk) in resp.chunks(64 * 1024).enumerate() {
            assert!(chunk.iter().all(|b| *b == b'a' + i as u8), "chunk {}", i);
        }

        assert_eq!(l.connection_count(), 1);
        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());

        // still readable after going back to read-only interest
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        drive(&mut l, |l| write_blocked(l));

        l.shutdown();

        assert_eq!(l.connection_count(), 0);
        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());
    }

    #[test]
    fn invalid_arena_sizing() {
        let mut config = config();
        config.write_arena.medium_slot_size = 16;

        match TestLoop::new(&config, Echo) {
            Ok(_) => panic!("loop should not be created"),
            Err(e) => {
                assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
                assert_eq!(e.to_string(), "write arena: medium slot size must be larger than 64");
            }
        }
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut l = TestLoop::new(&config(), Echo).unwrap();

        let (mut client, server) = socket_pair();
        l.accept_sender().try_send(server).unwrap();

        client.write_all(b"GET / HTTP/1.1\r\n").unwrap();

        drive(&mut l, |l| l.read_arena().available(Tier::Small) < 8);

        // queued but never routed
        let mut msg = l.write_arena.acquire().unwrap();
        msg.set_connection_id(FIRST_CONNECTION_ID);
        l.outbound_sender().try_send(msg).unwrap();

        // accepted but never added
        let (_client2, server2) = socket_pair();
        l.accept_sender().try_send(server2).unwrap();

        l.shutdown();

        assert_eq!(l.connection_count(), 0);
        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());

        let mut buf = [0; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn run_until_stopped() {
        let mut l = EventLoop::<HttpMessageReader, _>::new(&config(), echo_fn()).unwrap();

        let accept = l.accept_sender();
        let stop = l.stop_handle();

        let thread = thread::spawn(move || {
            l.run();

            l
        });

        let (mut client, server) = socket_pair();
        accept.send(server).unwrap();

        let req = b"DELETE /x HTTP/1.1\r\n\r\n";
        client.write_all(req).unwrap();

        let mut resp = [0; 22];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(&resp, req);

        stop.stop();

        let l = thread.join().unwrap();

        assert_eq!(l.connection_count(), 0);
        assert_all_free(l.read_arena());
        assert_all_free(l.write_arena());

        let mut buf = [0; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
