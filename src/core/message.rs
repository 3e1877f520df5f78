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

use crate::core::arena::Tier;
use crate::http1::parse::RequestHead;

/// Connection id carried by messages not yet bound to a connection.
pub const UNBOUND: u64 = 0;

/// Protocol data describing the bytes of a message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Metadata {
    #[default]
    None,
    Http(RequestHead),
}

/// A handle to one arena slot holding a message.
///
/// A message is a plain value referring to a byte range owned by a
/// [`TieredArena`](crate::core::arena::TieredArena). It can't be cloned:
/// whoever holds it owns the slot, and is responsible for giving it back
/// with `TieredArena::release` once done. The bytes are read through the
/// arena that produced it.
#[derive(Debug)]
pub struct Message {
    pub(crate) arena_id: u32,
    pub(crate) tier: Tier,
    pub(crate) offset: usize,
    pub(crate) capacity: usize,
    pub(crate) len: usize,
    conn_id: u64,
    metadata: Metadata,
}

impl Message {
    pub(crate) fn new(arena_id: u32, tier: Tier, offset: usize, capacity: usize) -> Self {
        Self {
            arena_id,
            tier,
            offset,
            capacity,
            len: 0,
            conn_id: UNBOUND,
            metadata: Metadata::None,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    pub fn set_connection_id(&mut self, id: u64) {
        self.conn_id = id;
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    // offset of the slot within its tier's region
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    pub fn http_head(&self) -> Option<&RequestHead> {
        match &self.metadata {
            Metadata::Http(head) => Some(head),
            Metadata::None => None,
        }
    }
}
