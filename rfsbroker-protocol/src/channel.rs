//! Duplex byte-pipe channel with record and string framing.
//!
//! A [`PipeChannel`] owns one read pipe and one write pipe to the peer
//! process plus an internal self-pipe used to abort a blocked receive from
//! another thread. Requests and replies are strictly ordered; there is no
//! timeout at this layer, liveness against a hung peer comes from
//! [`WakeHandle::wake`].

use crate::error::ChannelError;
use crate::pipe::{self, Readable};
use crate::wire::Record;
use crate::MAX_STRING_SIZE;
use bytes::BytesMut;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

/// Cross-thread handle that releases a receive blocked on the channel.
///
/// Waking is sticky: once woken, every subsequent receive on the channel
/// fails with [`ChannelError::Aborted`]. The channel must be torn down and
/// re-handshaked afterwards.
#[derive(Clone)]
pub struct WakeHandle {
    wake_tx: Arc<OwnedFd>,
}

impl WakeHandle {
    /// Releases a pending receive on the owning channel.
    ///
    /// Safe to call concurrently with an in-progress receive on another
    /// thread, and a no-op once the channel is gone.
    pub fn wake(&self) {
        // One byte is enough; write errors just mean nobody is listening.
        let _ = pipe::write_fd(self.wake_tx.as_fd(), &[1]);
    }
}

/// Synchronous duplex channel over a pair of unidirectional pipes.
pub struct PipeChannel {
    rx: OwnedFd,
    tx: OwnedFd,
    wake_rx: OwnedFd,
    wake_tx: Arc<OwnedFd>,
}

impl PipeChannel {
    /// Wraps existing pipe ends: `rx` carries bytes from the peer, `tx`
    /// carries bytes to it.
    pub fn from_fds(rx: OwnedFd, tx: OwnedFd) -> std::io::Result<Self> {
        let (wake_rx, wake_tx) = pipe::pipe_pair()?;
        pipe::set_cloexec(wake_rx.as_fd())?;
        pipe::set_cloexec(wake_tx.as_fd())?;
        Ok(Self {
            rx,
            tx,
            wake_rx,
            wake_tx: Arc::new(wake_tx),
        })
    }

    /// Builds two cross-connected endpoints, for exercising both sides of
    /// the protocol in-process.
    pub fn pair() -> std::io::Result<(Self, Self)> {
        let (a_rx, b_tx) = pipe::pipe_pair()?;
        let (b_rx, a_tx) = pipe::pipe_pair()?;
        Ok((Self::from_fds(a_rx, a_tx)?, Self::from_fds(b_rx, b_tx)?))
    }

    /// Returns a handle that can abort a blocked receive from another thread.
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            wake_tx: Arc::clone(&self.wake_tx),
        }
    }

    /// Sends exactly `buf.len()` bytes.
    pub fn send(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        let mut sent = 0;
        while sent < buf.len() {
            sent += pipe::write_fd(self.tx.as_fd(), &buf[sent..])?;
        }
        Ok(())
    }

    /// Receives exactly `buf.len()` bytes.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        let mut got = 0;
        while got < buf.len() {
            match pipe::wait_readable(self.rx.as_fd(), self.wake_rx.as_fd())? {
                Readable::Wake => return Err(ChannelError::Aborted),
                Readable::Data => {}
            }
            let n = pipe::read_fd(self.rx.as_fd(), &mut buf[got..])?;
            if n == 0 {
                return Err(ChannelError::Closed);
            }
            got += n;
        }
        Ok(())
    }

    /// Sends one fixed-layout record.
    pub fn send_record<T: Record>(&mut self, value: &T) -> Result<(), ChannelError> {
        let mut buf = BytesMut::with_capacity(T::SIZE);
        value.encode(&mut buf);
        self.send(&buf)
    }

    /// Receives one fixed-layout record.
    pub fn recv_record<T: Record>(&mut self) -> Result<T, ChannelError> {
        let mut buf = vec![0u8; T::SIZE];
        self.recv(&mut buf)?;
        let mut slice = &buf[..];
        Ok(T::decode(&mut slice))
    }

    /// Sends a length-prefixed string. Length zero means "empty", not
    /// "absent".
    pub fn send_str(&mut self, s: &str) -> Result<(), ChannelError> {
        if s.len() > MAX_STRING_SIZE as usize {
            return Err(ChannelError::TooLarge {
                size: u32::try_from(s.len()).unwrap_or(u32::MAX),
                max: MAX_STRING_SIZE,
            });
        }
        self.send_record(&(s.len() as u32))?;
        self.send(s.as_bytes())
    }

    /// Receives a length-prefixed string.
    ///
    /// A declared length above [`MAX_STRING_SIZE`] is refused before any
    /// allocation; the stream is desynced at that point.
    pub fn recv_str(&mut self) -> Result<String, ChannelError> {
        let len: u32 = self.recv_record()?;
        if len > MAX_STRING_SIZE {
            tracing::debug!(len, "string length prefix exceeds bound");
            return Err(ChannelError::TooLarge {
                size: len,
                max: MAX_STRING_SIZE,
            });
        }
        let mut buf = vec![0u8; len as usize];
        self.recv(&mut buf)?;
        String::from_utf8(buf).map_err(|_| ChannelError::InvalidUtf8)
    }
}
