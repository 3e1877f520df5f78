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

use crate::core::arena::ArenaError;
use crate::core::eventloop::{MessageProcessor, WriteProxy};
use crate::core::message::Message;
use crate::http1::parse::Method;
use log::{debug, warn};
use std::io::{self, Write};

const HEADERS_MAX: usize = 32;
const HEAD_SIZE_MAX: usize = 256;

const GREETING: &[u8] = b"hello from slabnet, you asked for ";

fn write_head(
    proxy: &mut WriteProxy<'_>,
    msg: &mut Message,
    code: u16,
    reason: &str,
    content_length: usize,
) -> Result<(), ArenaError> {
    let mut buf = [0; HEAD_SIZE_MAX];
    let mut c = io::Cursor::new(&mut buf[..]);

    // fixed format with small values, always fits
    if write!(
        c,
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        code, reason, content_length
    )
    .is_err()
    {
        return Err(ArenaError::TooLarge);
    }

    let size = c.position() as usize;

    proxy.write_all(msg, &buf[..size])
}

// Demonstration processor. Greets GET, HEAD and DELETE requests with the
// request target, echoes the body of POST and PUT requests, and answers
// anything it can't parse with a 400.
#[derive(Default)]
pub struct HelloResponder;

impl HelloResponder {
    pub fn new() -> Self {
        Self
    }

    fn respond(
        &self,
        msg: &Message,
        data: &[u8],
        proxy: &mut WriteProxy<'_>,
        out: &mut Message,
    ) -> Result<(), ArenaError> {
        let head = match msg.http_head() {
            Some(head) => head,
            None => return write_head(proxy, out, 400, "Bad Request", 0),
        };

        let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];
        let mut req = httparse::Request::new(&mut headers);

        let target = match req.parse(&data[..head.body_start]) {
            Ok(httparse::Status::Complete(_)) => req.path.unwrap_or("/"),
            Ok(httparse::Status::Partial) | Err(_) => {
                debug!("conn {}: unparsable request", msg.connection_id());

                return write_head(proxy, out, 400, "Bad Request", 0);
            }
        };

        match head.method {
            Some(Method::Get) | Some(Method::Delete) => {
                write_head(proxy, out, 200, "OK", GREETING.len() + target.len() + 1)?;

                proxy.write_all(out, GREETING)?;
                proxy.write_all(out, target.as_bytes())?;
                proxy.write_all(out, b"\n")
            }
            Some(Method::Head) => {
                write_head(proxy, out, 200, "OK", GREETING.len() + target.len() + 1)
            }
            Some(Method::Post) | Some(Method::Put) => {
                let body = &data[head.body_start..head.body_end];

                write_head(proxy, out, 200, "OK", body.len())?;

                proxy.write_all(out, body)
            }
            None => write_head(proxy, out, 405, "Method Not Allowed", 0),
        }
    }
}

impl MessageProcessor for HelloResponder {
    fn process(&mut self, msg: &Message, data: &[u8], proxy: &mut WriteProxy<'_>) {
        let mut out = match proxy.allocate() {
            Some(out) => out,
            None => {
                warn!(
                    "conn {}: write arena exhausted, dropping response",
                    msg.connection_id()
                );
                return;
            }
        };

        if let Err(e) = self.respond(msg, data, proxy, &mut out) {
            warn!("conn {}: failed to build response: {}", msg.connection_id(), e);

            proxy.release(out);
            return;
        }

        proxy.enqueue(out);
    }
}
