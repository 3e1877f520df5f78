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
use crate::core::message::{Message, Metadata};
use crate::core::reader::{MessageReader, ReadError};
use crate::http1::parse::{parse_request, RequestHead};
use std::mem;

// Frames HTTP/1 requests. Bytes accumulate in the message in progress until
// a whole request is present. Each complete request is copied into a message
// of its own, sized to fit, and the bytes after it stay behind as the start
// of the next one. A read larger than a slot is taken in pieces, so only a
// single request needs to fit in the largest slot.
#[derive(Default)]
pub struct HttpMessageReader {
    next: Option<Message>,
    head: RequestHead,
    complete: Vec<Message>,
}

impl HttpMessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    // bytes buffered for the request in progress
    #[cfg(test)]
    fn pending(&self) -> usize {
        match &self.next {
            Some(msg) => msg.len(),
            None => 0,
        }
    }

    // moves every complete request out of the message in progress
    fn complete_requests(&mut self, arena: &mut TieredArena) -> Result<(), ReadError> {
        let msg = match &mut self.next {
            Some(msg) => msg,
            None => return Ok(()),
        };

        let len = msg.len();
        let mut start = 0;

        loop {
            let end = match parse_request(&arena.data(msg)[start..], &mut self.head) {
                Ok(Some(end)) => start + end,
                Ok(None) => break,
                Err(e) => {
                    arena.consume(msg, start);

                    return Err(e.into());
                }
            };

            let head = mem::take(&mut self.head);

            if start == 0 && end == len {
                // the whole message is the request
                if let Some(mut done) = self.next.take() {
                    done.set_metadata(Metadata::Http(head));
                    self.complete.push(done);
                }

                return Ok(());
            }

            let mut done = match arena.copy_out(msg, start..end) {
                Ok(done) => done,
                Err(e) => {
                    arena.consume(msg, start);

                    return Err(e.into());
                }
            };

            done.set_metadata(Metadata::Http(head));
            self.complete.push(done);

            start = end;

            if start == len {
                break;
            }
        }

        if start == len {
            if let Some(msg) = self.next.take() {
                arena.release(msg);
            }
        } else if start > 0 {
            arena.consume(msg, start);
        }

        Ok(())
    }
}

impl MessageReader for HttpMessageReader {
    fn prepare(&mut self, arena: &mut TieredArena) -> bool {
        if self.next.is_none() {
            self.next = arena.acquire();
        }

        self.next.is_some()
    }

    fn read(&mut self, mut src: &[u8], arena: &mut TieredArena) -> Result<(), ReadError> {
        while !src.is_empty() {
            if !self.prepare(arena) {
                return Err(ReadError::Exhausted);
            }

            let size = match &mut self.next {
                // fails only if the request in progress can't grow at all
                Some(msg) => arena.append(msg, src)?,
                None => return Err(ReadError::Exhausted),
            };

            src = &src[size..];

            self.complete_requests(arena)?;
        }

        Ok(())
    }

    fn messages(&mut self) -> &mut Vec<Message> {
        &mut self.complete
    }

    fn release(&mut self, arena: &mut TieredArena) {
        if let Some(msg) = self.next.take() {
            arena.release(msg);
        }

        for msg in self.complete.drain(..) {
            arena.release(msg);
        }

        self.head = RequestHead::default();
    }
}
