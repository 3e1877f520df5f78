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

use crate::http1::Error;
use std::cmp;
use std::fmt;
use std::str;

const CONTENT_LENGTH: &[u8] = b"Content-Length";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Head,
    Delete,
}

impl Method {
    // matches the exact token, so "GETX" is not a GET
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"HEAD" => Some(Self::Head),
            b"DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Framing information for one request, and the parse state needed to resume
/// once more bytes arrive.
///
/// Offsets are relative to the first byte of the request. `body_start` and
/// `body_end` are only meaningful once [`parse_request`] has returned the
/// request's end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Option<Method>,
    pub content_length: usize,
    pub body_start: usize,
    pub body_end: usize,

    // start of the line currently being parsed
    line_start: usize,

    // where to resume looking for the end of the current line
    scan_pos: usize,

    request_line_done: bool,
    headers_done: bool,
    content_length_seen: bool,
}

impl RequestHead {
    pub fn headers_done(&self) -> bool {
        self.headers_done
    }
}

// returns the position just past the first CRLF found at or after `from`
fn find_line_end(src: &[u8], from: usize) -> Option<usize> {
    if from >= src.len() {
        return None;
    }

    src[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| from + pos + 2)
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }

    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }

    s
}

fn parse_content_length(value: &[u8]) -> Result<usize, Error> {
    let value = trim(value);

    if value.is_empty() || !value.iter().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidContentLength);
    }

    // digits only, so this is valid utf-8
    let s = str::from_utf8(value).map_err(|_| Error::InvalidContentLength)?;

    s.parse().map_err(|_| Error::InvalidContentLength)
}

fn parse_header(line: &[u8], head: &mut RequestHead) -> Result<(), Error> {
    let colon = match line.iter().position(|b| *b == b':') {
        Some(pos) => pos,
        None => return Ok(()),
    };

    let name = trim(&line[..colon]);

    if !name.eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(());
    }

    let len = parse_content_length(&line[(colon + 1)..])?;

    if head.content_length_seen && head.content_length != len {
        return Err(Error::InvalidContentLength);
    }

    head.content_length = len;
    head.content_length_seen = true;

    Ok(())
}

/// Parses as much of a request as `src` contains.
///
/// `src` must start at the first byte of the request and contain all of the
/// bytes passed to earlier calls with the same `head`, possibly followed by
/// more. Returns the request's end offset (= `head.body_end`) once the head
/// and the whole body are present, or `None` if more bytes are needed. Lines
/// already parsed are not scanned again.
pub fn parse_request(src: &[u8], head: &mut RequestHead) -> Result<Option<usize>, Error> {
    while !head.headers_done {
        let end = match find_line_end(src, head.scan_pos) {
            Some(end) => end,
            None => {
                // a trailing CR may be completed by the next byte
                head.scan_pos = cmp::max(head.line_start, src.len().saturating_sub(1));

                return Ok(None);
            }
        };

        let line = &src[head.line_start..(end - 2)];

        if !head.request_line_done {
            let token = match line.iter().position(|b| *b == b' ') {
                Some(pos) => &line[..pos],
                None => line,
            };

            head.method = Method::from_token(token);
            head.request_line_done = true;
        } else if line.is_empty() {
            head.body_start = end;
            head.body_end = end
                .checked_add(head.content_length)
                .ok_or(Error::InvalidContentLength)?;
            head.headers_done = true;
        } else {
            parse_header(line, head)?;
        }

        head.line_start = end;
        head.scan_pos = end;
    }

    if src.len() >= head.body_end {
        Ok(Some(head.body_end))
    } else {
        Ok(None)
    }
}
