/*
 * Copyright (C) 2020 Fanout, Inc.
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

use log::error;
use std::sync::mpsc;
use std::sync::Arc;

// Bounded queue feeding the event loop from other threads. Every successful
// send wakes the loop's poller, so a loop waiting in poll picks up the item
// right away.
pub struct Sender<T> {
    sender: Option<mpsc::SyncSender<T>>,
    waker: Arc<mio::Waker>,
}

impl<T> Sender<T> {
    pub fn try_send(&self, t: T) -> Result<(), mpsc::TrySendError<T>> {
        match self.sender.as_ref() {
            Some(sender) => sender.try_send(t)?,
            None => return Err(mpsc::TrySendError::Disconnected(t)),
        }

        self.notify();

        Ok(())
    }

    // blocks while the queue is full
    pub fn send(&self, t: T) -> Result<(), mpsc::SendError<T>> {
        match self.sender.as_ref() {
            Some(sender) => sender.send(t)?,
            None => return Err(mpsc::SendError(t)),
        }

        self.notify();

        Ok(())
    }

    fn notify(&self) {
        if let Err(e) = self.waker.wake() {
            error!("failed to wake event loop: {}", e);
        }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            waker: Arc::clone(&self.waker),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // disconnect before waking so the receiver can observe it
        self.sender = None;

        self.notify();
    }
}

pub struct Receiver<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Receiver<T> {
    pub fn try_recv(&self) -> Result<T, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }
}

pub fn channel<T>(bound: usize, waker: Arc<mio::Waker>) -> (Sender<T>, Receiver<T>) {
    assert!(bound > 0);

    let (s, r) = mpsc::sync_channel::<T>(bound);

    let sender = Sender {
        sender: Some(s),
        waker,
    };

    let receiver = Receiver { receiver: r };

    (sender, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token, Waker};
    use std::mem;
    use std::thread;
    use std::time::Duration;

    const WAKER_TOKEN: Token = Token(0);

    fn setup() -> (Poll, Arc<Waker>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).unwrap());

        (poll, waker)
    }

    fn woken(poll: &mut Poll, timeout: Duration) -> bool {
        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(timeout)).unwrap();

        events.iter().any(|e| e.token() == WAKER_TOKEN)
    }

    #[test]
    fn test_send_recv() {
        let (_poll, waker) = setup();
        let (sender, receiver) = channel(1, waker);

        let result = receiver.try_recv();
        assert_eq!(result.unwrap_err(), mpsc::TryRecvError::Empty);

        let result = sender.try_send(42);
        assert_eq!(result.is_ok(), true);

        let result = sender.try_send(43);
        assert_eq!(result.unwrap_err(), mpsc::TrySendError::Full(43));

        assert_eq!(receiver.try_recv(), Ok(42));

        let result = receiver.try_recv();
        assert_eq!(result.unwrap_err(), mpsc::TryRecvError::Empty);

        let other = sender.clone();
        assert_eq!(other.try_send(44).is_ok(), true);
        assert_eq!(receiver.try_recv(), Ok(44));

        mem::drop(sender);
        mem::drop(other);

        let result = receiver.try_recv();
        assert_eq!(result.unwrap_err(), mpsc::TryRecvError::Disconnected);
    }

    #[test]
    fn test_notify() {
        let (mut poll, waker) = setup();

        // the poll's owner keeps the waker alive, as the event loop does
        let (sender, receiver) = channel(2, Arc::clone(&waker));

        assert!(!woken(&mut poll, Duration::from_millis(0)));

        sender.try_send(1).unwrap();
        assert!(woken(&mut poll, Duration::from_millis(1000)));
        assert_eq!(receiver.try_recv(), Ok(1));

        let thread = thread::spawn(move || {
            sender.send(2).unwrap();
        });

        assert!(woken(&mut poll, Duration::from_millis(5000)));
        thread.join().unwrap();

        assert_eq!(receiver.try_recv(), Ok(2));

        // the thread's sender was the last one
        assert_eq!(
            receiver.try_recv().unwrap_err(),
            mpsc::TryRecvError::Disconnected
        );

        mem::drop(waker);
    }
}
