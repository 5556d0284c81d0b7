//! Streaming sub-protocols: directory enumeration and file transfer.
//!
//! Each cursor borrows its [`RemoteHost`] and holds the busy flag for its
//! whole lifetime; dropping the cursor resynchronizes the channel (with a
//! stop exchange when the stream was left unfinished) and releases the
//! connection for the next operation.

use crate::connection::RemoteHost;
use crate::error::HostError;
use rfsbroker_protocol::{Command, FileInformation};
use std::io;

/// One enumerated directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub owner: String,
    pub group: String,
    pub info: FileInformation,
}

/// Cursor over a remote directory, produced by
/// [`RemoteHost::directory_enum`].
pub struct DirectoryEnumerator<'a> {
    conn: &'a RemoteHost,
    complete: bool,
}

impl<'a> DirectoryEnumerator<'a> {
    pub(crate) fn new(conn: &'a RemoteHost) -> Self {
        Self {
            conn,
            complete: false,
        }
    }

    /// Fetches the next entry; `None` once the directory is exhausted. An
    /// entry with an empty name terminates the stream broker-side. After
    /// an error the cursor is finished and yields `None`.
    pub fn next_entry(&mut self) -> Result<Option<DirectoryEntry>, HostError> {
        if self.complete {
            return Ok(None);
        }
        let fetched = self.conn.request(|ch| {
            ch.send_record(&Command::DirectoryEnum.code())?;
            RemoteHost::recv_reply(ch, Command::DirectoryEnum)?;
            let name = ch.recv_str()?;
            if name.is_empty() {
                return Ok(None);
            }
            Ok(Some(DirectoryEntry {
                name,
                owner: ch.recv_str()?,
                group: ch.recv_str()?,
                info: ch.recv_record()?,
            }))
        });
        match fetched {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                self.complete = true;
                Ok(None)
            }
            Err(err) => {
                self.complete = true;
                Err(err)
            }
        }
    }
}

impl Iterator for DirectoryEnumerator<'_> {
    type Item = Result<DirectoryEntry, HostError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

impl Drop for DirectoryEnumerator<'_> {
    fn drop(&mut self) {
        if !self.complete {
            // Abandoning mid-stream: tell the broker to stop producing
            // entries so the channel is aligned for the next operation.
            let stopped = self.conn.request(|ch| {
                ch.send_record(&Command::Stop.code())?;
                RemoteHost::recv_reply(ch, Command::Stop)
            });
            if let Err(err) = stopped {
                tracing::warn!(error = %err, "directory enumeration stop failed");
            }
        }
        self.conn.busy_reset();
    }
}

/// Remote file read stream, produced by [`RemoteHost::file_get`].
pub struct FileReader<'a> {
    conn: &'a RemoteHost,
    complete: bool,
}

impl<'a> FileReader<'a> {
    pub(crate) fn new(conn: &'a RemoteHost) -> Self {
        Self {
            conn,
            complete: false,
        }
    }

    /// Requests up to `buf.len()` bytes. Returns 0 at end of file. A
    /// broker answering with more bytes than requested can no longer be
    /// trusted to stay aligned, so the transfer is aborted outright.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, HostError> {
        if self.complete || buf.is_empty() {
            return Ok(0);
        }
        let conn = self.conn;
        let fetched = conn.request(|ch| {
            ch.send_record(&(buf.len() as u64))?;
            RemoteHost::recv_reply(ch, Command::FileGet)?;
            let actual = ch.recv_record::<u64>()? as usize;
            if actual == 0 {
                return Ok(0);
            }
            if actual > buf.len() {
                conn.abort();
                return Err(HostError::Protocol(format!(
                    "broker sent {actual} bytes for a {} byte read",
                    buf.len()
                )));
            }
            ch.recv(&mut buf[..actual])?;
            Ok(actual)
        });
        match fetched {
            Ok(0) => {
                self.complete = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                self.complete = true;
                Err(err)
            }
        }
    }
}

impl Drop for FileReader<'_> {
    fn drop(&mut self) {
        if !self.complete {
            // A zero-length request tells the broker to end the transfer.
            let stopped = self.conn.request(|ch| {
                ch.send_record(&0u64)?;
                RemoteHost::recv_reply(ch, Command::Stop)
            });
            if let Err(err) = stopped {
                tracing::warn!(error = %err, "file read stop failed");
            }
        }
        self.conn.busy_reset();
    }
}

impl io::Read for FileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileReader::read(self, buf).map_err(io::Error::other)
    }
}

/// Remote file write stream, produced by [`RemoteHost::file_put`].
///
/// Callers should finish with [`FileWriter::write_complete`]; dropping an
/// unfinished writer still closes the transfer, but any final broker-side
/// error is only logged.
pub struct FileWriter<'a> {
    conn: &'a RemoteHost,
    complete: bool,
}

impl<'a> FileWriter<'a> {
    pub(crate) fn new(conn: &'a RemoteHost) -> Self {
        Self {
            conn,
            complete: false,
        }
    }

    /// Appends one chunk and waits for its acknowledgment. Empty chunks
    /// are not sent; a zero length on the wire would end the transfer.
    pub fn write(&mut self, data: &[u8]) -> Result<(), HostError> {
        if self.complete {
            return Err(HostError::Generic("write after completed transfer".into()));
        }
        if data.is_empty() {
            return Ok(());
        }
        let sent = self.conn.request(|ch| {
            ch.send_record(&(data.len() as u64))?;
            ch.send(data)?;
            RemoteHost::recv_reply(ch, Command::FilePut)
        });
        if sent.is_err() {
            // The channel state is suspect; suppress the stop exchange
            // that drop would otherwise run.
            self.complete = true;
        }
        sent
    }

    /// Ends the transfer and collects the broker's final status, which
    /// carries errors from flushing the last chunks. Idempotent.
    pub fn write_complete(&mut self) -> Result<(), HostError> {
        if self.complete {
            return Ok(());
        }
        self.complete = true;
        self.conn.request(|ch| {
            ch.send_record(&0u64)?;
            RemoteHost::recv_reply(ch, Command::Stop)
        })
    }
}

impl Drop for FileWriter<'_> {
    fn drop(&mut self) {
        if !self.complete {
            self.complete = true;
            let stopped = self.conn.request(|ch| {
                ch.send_record(&0u64)?;
                RemoteHost::recv_reply(ch, Command::Stop)
            });
            if let Err(err) = stopped {
                tracing::warn!(error = %err, "file write finalization failed");
            }
        }
        self.conn.busy_reset();
    }
}

impl io::Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileWriter::write(self, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
