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

use std::cmp;

// Circular queue of free slot offsets. The writer (put) and reader (take)
// cursors move through the same backing array. When the write cursor wraps
// past the end before the read cursor does, the queue is "flipped" and the
// write cursor trails the read cursor until the reader wraps as well. This
// lets read == write mean empty when not flipped, and full when flipped.
pub struct FreeSlotIndex {
    elements: Box<[usize]>,
    write_pos: usize,
    read_pos: usize,
    flipped: bool,
}

impl FreeSlotIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            elements: vec![0; capacity].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            flipped: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.elements.len()
    }

    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.flipped = false;
    }

    pub fn available(&self) -> usize {
        if !self.flipped {
            self.write_pos - self.read_pos
        } else {
            self.capacity() - self.read_pos + self.write_pos
        }
    }

    pub fn remaining_capacity(&self) -> usize {
        if !self.flipped {
            self.capacity() - self.write_pos + self.read_pos
        } else {
            self.read_pos - self.write_pos
        }
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    // returns false if the index is full, in which case nothing is stored
    pub fn put(&mut self, offset: usize) -> bool {
        if !self.flipped {
            if self.write_pos < self.capacity() {
                self.elements[self.write_pos] = offset;
                self.write_pos += 1;

                return true;
            }

            self.write_pos = 0;
            self.flipped = true;
        }

        if self.write_pos < self.read_pos {
            self.elements[self.write_pos] = offset;
            self.write_pos += 1;

            true
        } else {
            false
        }
    }

    // stores as many offsets as there is room for, and returns the number
    // stored
    pub fn put_slice(&mut self, offsets: &[usize]) -> usize {
        let mut count = 0;

        if !self.flipped {
            let to_end = self.capacity() - self.write_pos;

            if offsets.len() <= to_end {
                let end = self.write_pos + offsets.len();
                self.elements[self.write_pos..end].copy_from_slice(offsets);
                self.write_pos = end;

                return offsets.len();
            }

            self.elements[self.write_pos..].copy_from_slice(&offsets[..to_end]);
            count = to_end;

            self.write_pos = 0;
            self.flipped = true;
        }

        let end = cmp::min(self.read_pos, self.write_pos + (offsets.len() - count));
        let size = end - self.write_pos;

        self.elements[self.write_pos..end].copy_from_slice(&offsets[count..(count + size)]);
        self.write_pos = end;

        count + size
    }

    pub fn take(&mut self) -> Option<usize> {
        if self.flipped {
            if self.read_pos < self.capacity() {
                let offset = self.elements[self.read_pos];
                self.read_pos += 1;

                return Some(offset);
            }

            self.read_pos = 0;
            self.flipped = false;
        }

        if self.read_pos < self.write_pos {
            let offset = self.elements[self.read_pos];
            self.read_pos += 1;

            Some(offset)
        } else {
            None
        }
    }

    // fills `into` with up to into.len() offsets, and returns the number
    // taken
    pub fn take_into(&mut self, into: &mut [usize]) -> usize {
        let mut count = 0;

        if self.flipped {
            let to_end = self.capacity() - self.read_pos;

            if into.len() <= to_end {
                let end = self.read_pos + into.len();
                into.copy_from_slice(&self.elements[self.read_pos..end]);
                self.read_pos = end;

                return into.len();
            }

            into[..to_end].copy_from_slice(&self.elements[self.read_pos..]);
            count = to_end;

            self.read_pos = 0;
            self.flipped = false;
        }

        let end = cmp::min(self.write_pos, self.read_pos + (into.len() - count));
        let size = end - self.read_pos;

        into[count..(count + size)].copy_from_slice(&self.elements[self.read_pos..end]);
        self.read_pos = end;

        count + size
    }
}
