//! Test support: a scripted broker running the broker side of the wire
//! protocol on a thread, over real pipes, behind the launcher seam.

use crate::connection::HostEnv;
use crate::error::HostError;
use crate::interact::{ConfirmIdentity, IdentityDecision, InteractiveLogin, LoginCredentials};
use crate::registry::{ProtocolInfo, ProtocolRegistry};
use crate::site::MemorySitesStore;
use crate::spawn::BrokerLauncher;
use parking_lot::Mutex;
use rfsbroker_protocol::{Command, InitStatus, PipeChannel, VERSION_MAGIC};
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) type BrokerScript = Box<dyn FnOnce(PipeChannel) + Send>;

/// Launcher that runs queued broker scripts on threads instead of spawning
/// processes. One script is consumed per handshake.
#[derive(Default)]
pub(crate) struct ThreadLauncher {
    scripts: Mutex<VecDeque<BrokerScript>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) launches: AtomicU32,
}

impl ThreadLauncher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, script: impl FnOnce(PipeChannel) + Send + 'static) {
        self.scripts.lock().push_back(Box::new(script));
    }

    /// Joins all broker threads, propagating their panics into the test.
    pub(crate) fn join_all(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.join().expect("broker script panicked");
        }
    }
}

impl BrokerLauncher for ThreadLauncher {
    fn launch(
        &self,
        _info: &ProtocolInfo,
        request_rd: OwnedFd,
        reply_wr: OwnedFd,
    ) -> Result<(), HostError> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .expect("no broker script queued");
        let channel = PipeChannel::from_fds(request_rd, reply_wr)
            .map_err(|err| HostError::Init(err.to_string()))?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.handles
            .lock()
            .push(std::thread::spawn(move || script(channel)));
        Ok(())
    }
}

/// Interactive login with a queue of scripted answers; panics when
/// prompted more often than the test expects.
#[derive(Default)]
pub(crate) struct ScriptedLogin {
    responses: Mutex<VecDeque<Option<LoginCredentials>>>,
    pub(crate) prompts: AtomicU32,
}

impl ScriptedLogin {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, response: Option<LoginCredentials>) {
        self.responses.lock().push_back(response);
    }

    pub(crate) fn push_credentials(&self, username: &str, password: &str) {
        self.push(Some(LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }
}

impl InteractiveLogin for ScriptedLogin {
    fn prompt(&self, _site_label: &str, _prior_failures: u32) -> Option<LoginCredentials> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .expect("unexpected interactive login prompt")
    }
}

/// Identity confirmation with a queue of scripted decisions.
#[derive(Default)]
pub(crate) struct ScriptedConfirm {
    decisions: Mutex<VecDeque<IdentityDecision>>,
    pub(crate) asks: AtomicU32,
}

impl ScriptedConfirm {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, decision: IdentityDecision) {
        self.decisions.lock().push_back(decision);
    }
}

impl ConfirmIdentity for ScriptedConfirm {
    fn confirm(&self, _site_label: &str, _new_identity: &str, _site_backed: bool) -> IdentityDecision {
        self.asks.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .pop_front()
            .expect("unexpected identity confirmation")
    }
}

/// Everything a connection test needs, wired together.
pub(crate) struct TestEnv {
    pub(crate) env: HostEnv,
    pub(crate) launcher: Arc<ThreadLauncher>,
    pub(crate) login: Arc<ScriptedLogin>,
    pub(crate) confirm: Arc<ScriptedConfirm>,
    pub(crate) sites: Arc<MemorySitesStore>,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        let launcher = ThreadLauncher::new();
        let login = ScriptedLogin::new();
        let confirm = ScriptedConfirm::new();
        let sites = Arc::new(MemorySitesStore::new());
        let registry = Arc::new(ProtocolRegistry::new([ProtocolInfo::new(
            "testproto",
            "testproto",
            false,
        )]));
        // Method-call clones keep the concrete Arc types so the field
        // assignments unsize to the trait objects.
        let env = HostEnv {
            sites: sites.clone(),
            login: login.clone(),
            identity: confirm.clone(),
            launcher: launcher.clone(),
            registry,
        };
        Self {
            env,
            launcher,
            login,
            confirm,
            sites,
        }
    }
}

/// Fields received during one round of the broker-side authentication loop.
#[derive(Debug, Clone)]
pub(crate) struct AuthRound {
    pub(crate) protocol: String,
    pub(crate) host: String,
    pub(crate) port: u32,
    pub(crate) login_mode: u32,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) options: String,
}

/// Broker side: writes the startup magic and a zero pid (thread brokers
/// have no process to kill).
pub(crate) fn send_hello(ch: &mut PipeChannel) {
    ch.send_record(&VERSION_MAGIC).unwrap();
    ch.send_record(&0i32).unwrap();
}

/// Broker side: reads one round of credentials.
pub(crate) fn recv_auth(ch: &mut PipeChannel) -> AuthRound {
    AuthRound {
        protocol: ch.recv_str().unwrap(),
        host: ch.recv_str().unwrap(),
        port: ch.recv_record().unwrap(),
        login_mode: ch.recv_record().unwrap(),
        username: ch.recv_str().unwrap(),
        password: ch.recv_str().unwrap(),
        options: ch.recv_str().unwrap(),
    }
}

pub(crate) fn send_status(ch: &mut PipeChannel, status: InitStatus) {
    ch.send_record(&status.code()).unwrap();
}

/// Broker side: full happy-path handshake. Returns the credentials the
/// host sent.
pub(crate) fn accept(ch: &mut PipeChannel) -> AuthRound {
    send_hello(ch);
    let round = recv_auth(ch);
    send_status(ch, InitStatus::Ok);
    round
}

pub(crate) fn recv_command(ch: &mut PipeChannel) -> Command {
    let raw: u32 = ch.recv_record().unwrap();
    Command::from_u32(raw).expect("broker received unknown command")
}

pub(crate) fn expect_command(ch: &mut PipeChannel, expected: Command) {
    assert_eq!(recv_command(ch), expected);
}

pub(crate) fn reply(ch: &mut PipeChannel, cmd: Command) {
    ch.send_record(&cmd.code()).unwrap();
}

/// Broker side: answers one IsBroken probe with the given payload.
pub(crate) fn serve_is_broken(ch: &mut PipeChannel, remote_broken: bool) {
    expect_command(ch, Command::IsBroken);
    reply(ch, Command::IsBroken);
    ch.send_record(&remote_broken).unwrap();
}

/// Broker side: asserts the host closed its end without further requests.
pub(crate) fn expect_eof(ch: &mut PipeChannel) {
    use rfsbroker_protocol::ChannelError;
    match ch.recv_record::<u32>() {
        Err(ChannelError::Closed) => {}
        other => panic!("expected channel close, got {other:?}"),
    }
}
