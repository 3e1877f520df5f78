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

use crate::core::arena::{ArenaError, TieredArena};
use crate::core::message::Message;
use crate::http1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("no free slot available")]
    Exhausted,

    #[error("message too large")]
    TooLarge,

    #[error(transparent)]
    Framing(#[from] http1::Error),
}

impl From<ArenaError> for ReadError {
    fn from(e: ArenaError) -> Self {
        match e {
            ArenaError::Exhausted => Self::Exhausted,
            ArenaError::TooLarge => Self::TooLarge,
        }
    }
}

/// Turns the bytes received on one connection into complete messages.
///
/// A reader belongs to a single connection. It holds arena slots for the
/// message in progress and for completed messages not yet collected, all of
/// which must be handed back with [`release`](MessageReader::release) before
/// the reader is dropped.
pub trait MessageReader {
    /// Makes sure a slot is available for the next read. Returns false if
    /// the arena is exhausted, in which case the caller should not read from
    /// the connection yet.
    fn prepare(&mut self, arena: &mut TieredArena) -> bool;

    /// Consumes bytes received from the connection. Messages completed by
    /// them are added to [`messages`](MessageReader::messages).
    fn read(&mut self, src: &[u8], arena: &mut TieredArena) -> Result<(), ReadError>;

    /// Completed messages, oldest first. The caller takes ownership by
    /// draining the list.
    fn messages(&mut self) -> &mut Vec<Message>;

    fn release(&mut self, arena: &mut TieredArena);
}
