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

use std::cmp;
use std::io::{self, Read, Write};

// Linear byte buffer filled from the front. Used as the scratch area that
// socket reads land in before being handed to a message reader.
pub struct Buffer {
    buf: Vec<u8>,
    end: usize,
}

impl Buffer {
    pub fn new(size: usize) -> Buffer {
        let buf = vec![0; size];

        Buffer { buf, end: 0 }
    }

    pub fn clear(&mut self) {
        self.end = 0;
    }

    // the bytes written so far
    pub fn read_buf(&self) -> &[u8] {
        &self.buf[..self.end]
    }

    pub fn write_avail(&self) -> usize {
        self.buf.len() - self.end
    }

    fn write_buf(&mut self) -> &mut [u8] {
        let len = self.buf.len();

        &mut self.buf[self.end..len]
    }

    fn write_commit(&mut self, amount: usize) {
        assert!(self.end + amount <= self.buf.len());

        self.end += amount;
    }

    // a single read call into the writable region. returns the number of
    // bytes read, which is 0 at end of stream
    pub fn write_from<R: Read>(&mut self, r: &mut R) -> Result<usize, io::Error> {
        let size = r.read(self.write_buf())?;

        self.write_commit(size);

        Ok(size)
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        if !buf.is_empty() && self.write_avail() == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }

        let dest = self.write_buf();
        let size = cmp::min(dest.len(), buf.len());

        dest[..size].copy_from_slice(&buf[..size]);

        self.write_commit(size);

        Ok(size)
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer() {
        let mut b = Buffer::new(8);
        assert!(b.read_buf().is_empty());
        assert_eq!(b.write_avail(), 8);

        let mut src: &[u8] = b"hello world";
        assert_eq!(b.write_from(&mut src).unwrap(), 8);
        assert_eq!(b.read_buf(), b"hello wo");
        assert_eq!(b.write_avail(), 0);

        b.clear();
        assert!(b.read_buf().is_empty());
        assert_eq!(b.write_avail(), 8);

        assert_eq!(b.write_from(&mut src).unwrap(), 3);
        assert_eq!(b.read_buf(), b"rld");

        // end of stream
        assert_eq!(b.write_from(&mut src).unwrap(), 0);
        assert_eq!(b.read_buf(), b"rld");
    }

    #[test]
    fn test_write() {
        let mut b = Buffer::new(4);

        assert_eq!(b.write(b"abc").unwrap(), 3);
        assert_eq!(b.write(b"def").unwrap(), 1);
        assert_eq!(b.read_buf(), b"abcd");

        let e = b.write(b"g").unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::WriteZero);

        assert_eq!(b.write(b"").unwrap(), 0);

        b.clear();
        assert_eq!(b.write_avail(), 4);
    }
}
