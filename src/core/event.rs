/*
 * Copyright (C) 2021 Fanout, Inc.
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

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;

const EVENTS_MAX: usize = 1024;

// reserved for cross-thread wakeups
pub const WAKER_TOKEN: Token = Token(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

pub struct Poller {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Poller {
    pub fn new() -> Result<Self, io::Error> {
        let poll = Poll::new()?;
        let events = Events::with_capacity(EVENTS_MAX);
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events,
            waker,
        })
    }

    pub fn waker(&self) -> &Arc<Waker> {
        &self.waker
    }

    pub fn register<S>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        if token == WAKER_TOKEN {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        self.poll.registry().register(source, token, interests)
    }

    pub fn reregister<S>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        if token == WAKER_TOKEN {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        self.poll.registry().reregister(source, token, interests)
    }

    pub fn deregister<S>(&self, source: &mut S) -> Result<(), io::Error>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    // None blocks until something is ready or the waker fires
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        match self.poll.poll(&mut self.events, timeout) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.events.clear();

                Ok(())
            }
            ret => ret,
        }
    }

    // events from the last poll, excluding wakeups. errors and hangups are
    // reported as readiness in both directions so the owner gets to observe
    // them through read/write
    pub fn iter_events(&self) -> EventsIterator<'_> {
        EventsIterator {
            events: self.events.iter(),
        }
    }
}

pub struct EventsIterator<'a> {
    events: mio::event::Iter<'a>,
}

impl Iterator for EventsIterator<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        for event in self.events.by_ref() {
            if event.token() == WAKER_TOKEN {
                continue;
            }

            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed() || event.is_error();

            if readable || writable {
                return Some(Event {
                    token: event.token(),
                    readable,
                    writable,
                });
            }
        }

        None
    }
}
