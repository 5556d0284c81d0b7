//! Broker process launching.

use crate::error::HostError;
use crate::registry::ProtocolInfo;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Starts the broker for a resolved protocol.
///
/// The two descriptors are the ends the broker must use: `request_rd` for
/// reading commands, `reply_wr` for writing replies. The implementation
/// takes ownership; the caller's copies of these ends must be gone once
/// `launch` returns so pipe EOFs propagate correctly.
pub trait BrokerLauncher: Send + Sync {
    fn launch(
        &self,
        info: &ProtocolInfo,
        request_rd: OwnedFd,
        reply_wr: OwnedFd,
    ) -> Result<(), HostError>;
}

/// Launches `<broker_dir>/<broker>.broker <request_fd> <reply_fd>` as a
/// detached child process.
pub struct ExecLauncher {
    broker_dir: PathBuf,
}

impl ExecLauncher {
    pub fn new(broker_dir: impl Into<PathBuf>) -> Self {
        Self {
            broker_dir: broker_dir.into(),
        }
    }
}

impl BrokerLauncher for ExecLauncher {
    fn launch(
        &self,
        info: &ProtocolInfo,
        request_rd: OwnedFd,
        reply_wr: OwnedFd,
    ) -> Result<(), HostError> {
        let exe = self.broker_dir.join(format!("{}.broker", info.broker));
        tracing::debug!(exe = %exe.display(), "starting broker process");

        let mut child = Command::new(&exe)
            .arg(request_rd.as_raw_fd().to_string())
            .arg(reply_wr.as_raw_fd().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| {
                HostError::Init(format!("failed to start broker '{}': {err}", exe.display()))
            })?;

        // The child inherited the pipe ends (they are not close-on-exec);
        // drop our copies now.
        drop((request_rd, reply_wr));

        // Reap in the background so an exited broker does not linger as a
        // zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(())
    }
}

/// Forcibly terminates a broker by pid. Used by abort; best-effort.
pub(crate) fn kill_broker(pid: i32) {
    if pid > 0 {
        unsafe {
            libc::kill(pid, libc::SIGQUIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfsbroker_protocol::pipe;

    #[test]
    fn test_launch_missing_binary_is_init_error() {
        let launcher = ExecLauncher::new("/nonexistent/brokers");
        let info = ProtocolInfo::new("sftp", "sftp", true);
        let (request_rd, _request_wr) = pipe::pipe_pair().unwrap();
        let (_reply_rd, reply_wr) = pipe::pipe_pair().unwrap();

        let err = launcher.launch(&info, request_rd, reply_wr).unwrap_err();
        assert!(matches!(err, HostError::Init(_)));
        assert!(err.to_string().contains("sftp.broker"));
    }
}
