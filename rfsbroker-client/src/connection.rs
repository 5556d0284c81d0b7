//! Connection lifecycle: broker spawning, handshake, authentication loop,
//! and the simple request/reply operations.

use crate::error::HostError;
use crate::interact::{ConfirmIdentity, IdentityDecision, InteractiveLogin};
use crate::options::{OptionsBlob, SERVER_IDENTITY_KEY};
use crate::registry::ProtocolRegistry;
use crate::site::{LoginMode, SitesStore};
use crate::spawn::{self, BrokerLauncher};
use crate::stream::{DirectoryEnumerator, FileReader, FileWriter};
use parking_lot::Mutex;
use rfsbroker_protocol::pipe;
use rfsbroker_protocol::{
    Command, FileInformation, InitStatus, PipeChannel, TimeSpec, WakeHandle, VERSION_MAGIC,
};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// External collaborators a connection needs: credential store, interactive
/// UI seams, broker launcher and the protocol table. Cheap to clone; clones
/// share the same collaborators.
#[derive(Clone)]
pub struct HostEnv {
    pub sites: Arc<dyn SitesStore>,
    pub login: Arc<dyn InteractiveLogin>,
    pub identity: Arc<dyn ConfirmIdentity>,
    pub launcher: Arc<dyn BrokerLauncher>,
    pub registry: Arc<ProtocolRegistry>,
}

impl HostEnv {
    /// Builds an environment over the process-wide protocol registry.
    pub fn new(
        sites: Arc<dyn SitesStore>,
        login: Arc<dyn InteractiveLogin>,
        identity: Arc<dyn ConfirmIdentity>,
        launcher: Arc<dyn BrokerLauncher>,
    ) -> Self {
        Self {
            sites,
            login,
            identity,
            launcher,
            registry: ProtocolRegistry::global(),
        }
    }
}

/// Credential fields, guarded by one lock because `site_name`/`clone` may
/// run concurrently with the authentication loop mutating them. The lock
/// is never held across pipe I/O or collaborator calls.
#[derive(Clone)]
struct Credentials {
    protocol: String,
    host: String,
    port: u32,
    login_mode: LoginMode,
    username: String,
    password: String,
    options: String,
}

struct AbortState {
    wake: Option<WakeHandle>,
    peer: i32,
}

/// One logical link to one remote site, served by a broker child process.
///
/// Exactly one data operation may be in flight at a time; concurrent data
/// calls from two threads are a usage error caught by the busy flag, not a
/// race to tolerate. `abort`, `clone`, `site_name` and the broken-flag
/// fast path of `is_broken` are the only members safe to call from a
/// second thread while another is mid-operation.
pub struct RemoteHost {
    site: String,
    env: HostEnv,
    creds: Mutex<Credentials>,
    busy: AtomicBool,
    broken: AtomicBool,
    pending_init: AtomicBool,
    io: Mutex<Option<PipeChannel>>,
    abort_state: Mutex<AbortState>,
}

impl RemoteHost {
    /// Creates a connection from a stored site. No I/O happens until the
    /// first operation.
    pub fn from_site(env: HostEnv, site: &str) -> Result<Self, HostError> {
        let record = env
            .sites
            .load(site)
            .ok_or_else(|| HostError::Init(format!("unknown site: {site}")))?;
        let mut creds = Credentials {
            protocol: record.protocol,
            host: record.host,
            port: record.port,
            login_mode: record.login_mode,
            username: record.username,
            password: record.password,
            options: record.options,
        };
        if creds.login_mode == LoginMode::Anonymous {
            creds.password.clear();
        }
        Ok(Self::with_creds(env, site.to_string(), creds))
    }

    /// Creates an ad-hoc connection from explicit parameters. Credentials
    /// are never persisted. The login mode is derived: anonymous when both
    /// username (or "anonymous") and password are empty, interactive when
    /// only the password is missing, stored otherwise.
    pub fn from_params(
        env: HostEnv,
        protocol: &str,
        host: &str,
        port: u32,
        username: &str,
        password: &str,
    ) -> Self {
        let login_mode = if (username.is_empty() || username == "anonymous") && password.is_empty()
        {
            LoginMode::Anonymous
        } else if password.is_empty() {
            LoginMode::AskInteractive
        } else {
            LoginMode::UseStored
        };
        Self::with_creds(
            env,
            String::new(),
            Credentials {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                login_mode,
                username: username.to_string(),
                password: password.to_string(),
                options: String::new(),
            },
        )
    }

    fn with_creds(env: HostEnv, site: String, creds: Credentials) -> Self {
        Self {
            site,
            env,
            creds: Mutex::new(creds),
            busy: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            pending_init: AtomicBool::new(true),
            io: Mutex::new(None),
            abort_state: Mutex::new(AbortState {
                wake: None,
                peer: 0,
            }),
        }
    }

    /// The site identifier, or empty for ad-hoc connections.
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Human-readable label: the site identifier, or `proto:user@host`
    /// with slashes flattened. Safe to call from any thread.
    pub fn site_name(&self) -> String {
        if !self.site.is_empty() {
            return self.site.clone();
        }
        let creds = self.creds.lock();
        let mut out = format!("{}:", creds.protocol);
        if !creds.username.is_empty() {
            out.push_str(&creds.username);
            out.push('@');
        }
        out.push_str(&creds.host);
        out.replace('/', "\\")
    }

    /// Current login mode; promoted to `UseStored` after a successful
    /// interactive login.
    pub fn login_mode(&self) -> LoginMode {
        self.creds.lock().login_mode
    }

    /// Whether an operation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // ---- busy discipline ------------------------------------------------

    pub(crate) fn busy_set(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            panic!("operation started while connection is busy");
        }
    }

    pub(crate) fn busy_reset(&self) {
        if !self.busy.swap(false, Ordering::SeqCst) {
            panic!("busy flag cleared while not busy");
        }
    }

    fn assert_not_busy(&self) {
        if self.busy.load(Ordering::SeqCst) {
            panic!("connection is busy");
        }
    }

    fn busy_scope(&self) -> BusyGuard<'_> {
        self.busy_set();
        BusyGuard(self)
    }

    /// Run before every public operation: busy is a programming error,
    /// a pending (fresh or cloned) connection handshakes lazily, and a
    /// broken connection fails until explicitly re-handshaked.
    fn check_ready(&self) -> Result<(), HostError> {
        self.assert_not_busy();
        if self.pending_init.load(Ordering::SeqCst) {
            self.reinitialize()?;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(HostError::Broken);
        }
        Ok(())
    }

    // ---- handshake ------------------------------------------------------

    /// Spawns a fresh broker and runs the version handshake and the
    /// authentication loop. Replaces the channel on success; on failure
    /// the connection stays pending/broken and may be retried.
    pub fn reinitialize(&self) -> Result<(), HostError> {
        self.assert_not_busy();
        let _busy = self.busy_scope();

        let channel = self.handshake()?;
        *self.io.lock() = Some(channel);
        self.pending_init.store(false, Ordering::SeqCst);
        self.broken.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn handshake(&self) -> Result<PipeChannel, HostError> {
        let (protocol, host) = {
            let creds = self.creds.lock();
            (creds.protocol.clone(), creds.host.clone())
        };

        let info = self
            .env
            .registry
            .lookup(&protocol)
            .ok_or_else(|| HostError::Init(format!("wrong protocol: {protocol}")))?
            .clone();
        if host.is_empty() && info.require_server {
            return Err(HostError::Init("no server specified".into()));
        }

        let pipe_err = |err: std::io::Error| HostError::Init(format!("pipe: {err}"));
        let (request_rd, request_wr) = pipe::pipe_pair().map_err(pipe_err)?;
        let (reply_rd, reply_wr) = pipe::pipe_pair().map_err(pipe_err)?;
        pipe::set_cloexec(request_wr.as_fd()).map_err(pipe_err)?;
        pipe::set_cloexec(reply_rd.as_fd()).map_err(pipe_err)?;

        tracing::debug!(protocol = %info.name, broker = %info.broker, "starting broker");
        self.env.launcher.launch(&info, request_rd, reply_wr)?;

        let mut channel = PipeChannel::from_fds(reply_rd, request_wr).map_err(pipe_err)?;

        // Register the wake handle before the first blocking read so an
        // abort can unblock a handshake hung on a silent broker. The pid
        // is unknown until the hello arrives.
        {
            let mut abort_state = self.abort_state.lock();
            abort_state.wake = Some(channel.wake_handle());
            abort_state.peer = 0;
        }

        let startup = |err| {
            tracing::debug!(error = %err, "broker startup read failed");
            HostError::Init(format!("failed to start broker '{}'", info.broker))
        };
        let magic: u32 = channel.recv_record().map_err(startup)?;
        let peer: i32 = channel.recv_record().map_err(startup)?;
        if magic != VERSION_MAGIC {
            return Err(HostError::Init(format!(
                "wrong version of broker '{}'",
                info.broker
            )));
        }
        tracing::debug!(peer, "broker handshake complete");
        self.abort_state.lock().peer = peer;

        self.authenticate(&mut channel)?;
        Ok(channel)
    }

    fn authenticate(&self, channel: &mut PipeChannel) -> Result<(), HostError> {
        let mut auth_failures = 0u32;
        loop {
            if self.creds.lock().login_mode == LoginMode::AskInteractive {
                // Credential lock is not held across the prompt.
                match self.env.login.prompt(&self.site_name(), auth_failures) {
                    Some(entered) => {
                        let mut creds = self.creds.lock();
                        creds.username = entered.username;
                        creds.password = entered.password;
                    }
                    None => {
                        // Empty credential string closes the broker
                        // gracefully instead of leaving it blocked.
                        channel.send_str("")?;
                        return Err(HostError::Aborted);
                    }
                }
            }

            let snapshot = self.creds.lock().clone();
            channel.send_str(&snapshot.protocol)?;
            channel.send_str(&snapshot.host)?;
            channel.send_record(&snapshot.port)?;
            channel.send_record(&snapshot.login_mode.code())?;
            channel.send_str(&snapshot.username)?;
            channel.send_str(&snapshot.password)?;
            channel.send_str(&snapshot.options)?;

            let raw: u32 = channel.recv_record()?;
            let status = InitStatus::from_u32(raw).ok_or(HostError::Ipc {
                context: "unexpected protocol init status",
                code: raw,
            })?;

            if status == InitStatus::Ok {
                let mut creds = self.creds.lock();
                if creds.login_mode == LoginMode::AskInteractive {
                    // Next re-handshake reuses the password that just
                    // succeeded.
                    creds.login_mode = LoginMode::UseStored;
                }
                return Ok(());
            }

            let detail = channel.recv_str()?;
            tracing::debug!(status = raw, detail = %detail, "authentication round failed");

            match status {
                InitStatus::ServerIdentityChanged => {
                    if !self.on_server_identity_changed(&detail) {
                        return Err(HostError::Protocol(format!(
                            "server identity mismatch: {detail}"
                        )));
                    }
                    let mut creds = self.creds.lock();
                    if creds.login_mode == LoginMode::AskInteractive {
                        creds.login_mode = LoginMode::UseStored;
                    }
                }
                InitStatus::AuthorizationFailed => {
                    auth_failures += 1;
                    if auth_failures >= 3 {
                        return Err(HostError::Protocol(format!("authorization failed: {detail}")));
                    }
                    self.creds.lock().login_mode = LoginMode::AskInteractive;
                }
                InitStatus::ProtocolError => return Err(HostError::Protocol(detail)),
                InitStatus::GenericError => return Err(HostError::Generic(detail)),
                InitStatus::Ok => unreachable!(),
            }
        }
    }

    /// Returns false when the changed identity is rejected. A first-ever
    /// identity is adopted without prompting; otherwise the collaborator
    /// decides, and "allow always" persists the new identity into the
    /// site configuration.
    fn on_server_identity_changed(&self, new_identity: &str) -> bool {
        let (previous, protocol, updated) = {
            let creds = self.creds.lock();
            let mut blob = OptionsBlob::parse(&creds.options);
            let previous = blob.get(SERVER_IDENTITY_KEY).unwrap_or("").to_string();
            blob.set(SERVER_IDENTITY_KEY, new_identity);
            (previous, creds.protocol.clone(), blob.serialize())
        };

        if !previous.is_empty() {
            let decision =
                self.env
                    .identity
                    .confirm(&self.site_name(), new_identity, !self.site.is_empty());
            match decision {
                IdentityDecision::AllowOnce => {
                    // In memory only; the stored identity stays put.
                    self.creds.lock().options = updated;
                    return true;
                }
                IdentityDecision::AllowAlways => {}
                IdentityDecision::Deny => return false,
            }
        }

        self.creds.lock().options = updated.clone();
        if !self.site.is_empty() {
            self.env.sites.store_options(&self.site, &protocol, &updated);
        }
        true
    }

    // ---- channel plumbing ----------------------------------------------

    /// Runs one exchange against the channel; channel-level and desync
    /// errors mark the connection broken.
    pub(crate) fn request<T>(
        &self,
        exchange: impl FnOnce(&mut PipeChannel) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        let mut io = self.io.lock();
        let channel = io.as_mut().ok_or(HostError::Broken)?;
        match exchange(channel) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.breaks_connection() {
                    self.broken.store(true, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    /// Reads a reply opcode. Mismatches other than the dedicated error
    /// replies are fatal desyncs: the stream's byte alignment can no
    /// longer be trusted.
    pub(crate) fn recv_reply(channel: &mut PipeChannel, expected: Command) -> Result<(), HostError> {
        let raw: u32 = channel.recv_record()?;
        match Command::from_u32(raw) {
            Some(reply) if reply == expected => Ok(()),
            Some(Command::Error) => Err(HostError::Protocol(channel.recv_str()?)),
            Some(Command::Unsupported) => Err(HostError::Unsupported(channel.recv_str()?)),
            _ => Err(HostError::Ipc {
                context: "wrong command reply",
                code: expected.code(),
            }),
        }
    }

    // ---- cross-thread members ------------------------------------------

    /// Forcibly aborts any outstanding operation: releases a blocked
    /// receive, terminates the broker process if one is known, and leaves
    /// the connection broken until re-handshaked. Safe to call from
    /// another thread; repeated aborts are no-ops.
    pub fn abort(&self) {
        let mut abort_state = self.abort_state.lock();
        if let Some(wake) = abort_state.wake.as_ref() {
            wake.wake();
        }
        if abort_state.peer != 0 {
            tracing::debug!(peer = abort_state.peer, "terminating broker");
            spawn::kill_broker(abort_state.peer);
            abort_state.peer = 0;
        }
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Probes whether the connection is usable. Fail-safe: any error
    /// during the probe reports broken rather than risking a desynced
    /// channel.
    pub fn is_broken(&self) -> bool {
        if self.broken.load(Ordering::SeqCst) {
            return true;
        }

        let probe = || -> Result<bool, HostError> {
            self.check_ready()?;
            let _busy = self.busy_scope();
            self.request(|ch| {
                ch.send_record(&Command::IsBroken.code())?;
                Self::recv_reply(ch, Command::IsBroken)?;
                Ok(ch.recv_record::<bool>()?)
            })
        };

        match probe() {
            Ok(remote_broken) => remote_broken,
            Err(err) => {
                tracing::warn!(error = %err, "is_broken probe failed");
                self.broken.store(true, Ordering::SeqCst);
                true
            }
        }
    }

    // ---- simple operations ---------------------------------------------

    pub fn get_mode(&self, path: &str, follow_symlink: bool) -> Result<u32, HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::GetMode.code())?;
            ch.send_str(path)?;
            ch.send_record(&follow_symlink)?;
            Self::recv_reply(ch, Command::GetMode)?;
            Ok(ch.recv_record::<u32>()?)
        })
    }

    pub fn get_size(&self, path: &str, follow_symlink: bool) -> Result<u64, HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::GetSize.code())?;
            ch.send_str(path)?;
            ch.send_record(&follow_symlink)?;
            Self::recv_reply(ch, Command::GetSize)?;
            Ok(ch.recv_record::<u64>()?)
        })
    }

    pub fn get_information(
        &self,
        path: &str,
        follow_symlink: bool,
    ) -> Result<FileInformation, HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::GetInformation.code())?;
            ch.send_str(path)?;
            ch.send_record(&follow_symlink)?;
            Self::recv_reply(ch, Command::GetInformation)?;
            Ok(ch.recv_record::<FileInformation>()?)
        })
    }

    pub fn file_delete(&self, path: &str) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::FileDelete.code())?;
            ch.send_str(path)?;
            Self::recv_reply(ch, Command::FileDelete)
        })
    }

    pub fn directory_delete(&self, path: &str) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::DirectoryDelete.code())?;
            ch.send_str(path)?;
            Self::recv_reply(ch, Command::DirectoryDelete)
        })
    }

    pub fn directory_create(&self, path: &str, mode: u32) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::DirectoryCreate.code())?;
            ch.send_str(path)?;
            ch.send_record(&mode)?;
            Self::recv_reply(ch, Command::DirectoryCreate)
        })
    }

    pub fn rename(&self, path_old: &str, path_new: &str) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::Rename.code())?;
            ch.send_str(path_old)?;
            ch.send_str(path_new)?;
            Self::recv_reply(ch, Command::Rename)
        })
    }

    pub fn set_times(
        &self,
        path: &str,
        access_time: TimeSpec,
        modification_time: TimeSpec,
    ) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::SetTimes.code())?;
            ch.send_str(path)?;
            ch.send_record(&access_time)?;
            ch.send_record(&modification_time)?;
            Self::recv_reply(ch, Command::SetTimes)
        })
    }

    pub fn set_mode(&self, path: &str, mode: u32) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::SetMode.code())?;
            ch.send_str(path)?;
            ch.send_record(&mode)?;
            Self::recv_reply(ch, Command::SetMode)
        })
    }

    pub fn symlink_create(&self, link_path: &str, link_target: &str) -> Result<(), HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::SymlinkCreate.code())?;
            ch.send_str(link_path)?;
            ch.send_str(link_target)?;
            Self::recv_reply(ch, Command::SymlinkCreate)
        })
    }

    pub fn symlink_query(&self, link_path: &str) -> Result<String, HostError> {
        self.check_ready()?;
        let _busy = self.busy_scope();
        self.request(|ch| {
            ch.send_record(&Command::SymlinkQuery.code())?;
            ch.send_str(link_path)?;
            Self::recv_reply(ch, Command::SymlinkQuery)?;
            Ok(ch.recv_str()?)
        })
    }

    // ---- streaming operations ------------------------------------------

    /// Opens a directory enumeration. The connection stays busy until the
    /// returned cursor is dropped.
    pub fn directory_enum(&self, path: &str) -> Result<DirectoryEnumerator<'_>, HostError> {
        self.check_ready()?;
        self.busy_set();
        let opened = self.request(|ch| {
            ch.send_record(&Command::DirectoryEnum.code())?;
            ch.send_str(path)?;
            Self::recv_reply(ch, Command::DirectoryEnum)
        });
        match opened {
            Ok(()) => Ok(DirectoryEnumerator::new(self)),
            Err(err) => {
                self.busy_reset();
                Err(err)
            }
        }
    }

    /// Opens a file for reading from `resume_pos`. The connection stays
    /// busy until the returned reader is dropped.
    pub fn file_get(&self, path: &str, resume_pos: u64) -> Result<FileReader<'_>, HostError> {
        self.check_ready()?;
        self.busy_set();
        let opened = self.request(|ch| {
            ch.send_record(&Command::FileGet.code())?;
            ch.send_str(path)?;
            ch.send_record(&resume_pos)?;
            Self::recv_reply(ch, Command::FileGet)
        });
        match opened {
            Ok(()) => Ok(FileReader::new(self)),
            Err(err) => {
                self.busy_reset();
                Err(err)
            }
        }
    }

    /// Opens a file for writing at `resume_pos`. The connection stays
    /// busy until the returned writer is dropped.
    pub fn file_put(
        &self,
        path: &str,
        mode: u32,
        resume_pos: u64,
    ) -> Result<FileWriter<'_>, HostError> {
        self.check_ready()?;
        self.busy_set();
        let opened = self.request(|ch| {
            ch.send_record(&Command::FilePut.code())?;
            ch.send_str(path)?;
            ch.send_record(&mode)?;
            ch.send_record(&resume_pos)?;
            Self::recv_reply(ch, Command::FilePut)
        });
        match opened {
            Ok(()) => Ok(FileWriter::new(self)),
            Err(err) => {
                self.busy_reset();
                Err(err)
            }
        }
    }
}

impl Clone for RemoteHost {
    /// Snapshots site identity and credentials into an independent
    /// connection with the pending-init flag set; the clone handshakes
    /// lazily on first use. Locks only the credential fields, so cloning
    /// is safe while the source is busy.
    fn clone(&self) -> Self {
        let creds = self.creds.lock().clone();
        Self::with_creds(self.env.clone(), self.site.clone(), creds)
    }
}

impl Drop for RemoteHost {
    fn drop(&mut self) {
        // Destruction mid-operation is a programming error, same as a
        // concurrent second operation.
        self.assert_not_busy();
    }
}

struct BusyGuard<'a>(&'a RemoteHost);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy_reset();
    }
}
