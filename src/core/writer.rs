/*
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

use crate::core::arena::TieredArena;
use crate::core::message::Message;
use std::collections::VecDeque;
use std::io::{self, Write};

// Queue of outbound messages for one connection. The message at the front
// may be partially written, in which case `written` is the number of its
// bytes already accepted by the stream.
#[derive(Default)]
pub struct OutboundWriter {
    queue: VecDeque<Message>,
    written: usize,
}

impl OutboundWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    // Writes queued messages until the stream would block or the queue is
    // empty, releasing each message once it is fully written. Returns the
    // number of bytes written. WouldBlock is not an error.
    pub fn write<W: Write>(&mut self, w: &mut W, arena: &mut TieredArena) -> io::Result<usize> {
        let mut total = 0;

        while let Some(msg) = self.queue.front() {
            let data = &arena.data(msg)[self.written..];

            if data.is_empty() {
                self.finish(arena);
                continue;
            }

            let size = match w.write(data) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(size) => size,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };

            total += size;
            self.written += size;
        }

        Ok(total)
    }

    pub fn release(&mut self, arena: &mut TieredArena) {
        for msg in self.queue.drain(..) {
            arena.release(msg);
        }

        self.written = 0;
    }

    fn finish(&mut self, arena: &mut TieredArena) {
        if let Some(msg) = self.queue.pop_front() {
            arena.release(msg);
        }

        self.written = 0;
    }
}
