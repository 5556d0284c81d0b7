//! Command opcodes and init status codes spoken between host and broker.

/// Operation codes sent as u32 records.
///
/// Every simple request is answered by its own opcode on success, or by
/// [`Command::Error`] / [`Command::Unsupported`] followed by a message
/// string. Any other reply is a framing desync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    GetMode = 1,
    GetSize = 2,
    GetInformation = 3,
    FileDelete = 4,
    DirectoryDelete = 5,
    DirectoryCreate = 6,
    Rename = 7,
    SetTimes = 8,
    SetMode = 9,
    SymlinkCreate = 10,
    SymlinkQuery = 11,
    DirectoryEnum = 12,
    FileGet = 13,
    FilePut = 14,
    Stop = 15,
    IsBroken = 16,

    // Reply-only codes, each followed by a message string.
    Error = 100,
    Unsupported = 101,
}

impl Command {
    /// Wire representation of this opcode.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        Some(match code {
            1 => Command::GetMode,
            2 => Command::GetSize,
            3 => Command::GetInformation,
            4 => Command::FileDelete,
            5 => Command::DirectoryDelete,
            6 => Command::DirectoryCreate,
            7 => Command::Rename,
            8 => Command::SetTimes,
            9 => Command::SetMode,
            10 => Command::SymlinkCreate,
            11 => Command::SymlinkQuery,
            12 => Command::DirectoryEnum,
            13 => Command::FileGet,
            14 => Command::FilePut,
            15 => Command::Stop,
            16 => Command::IsBroken,
            100 => Command::Error,
            101 => Command::Unsupported,
            _ => return None,
        })
    }
}

/// Status codes answering one round of the authentication loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InitStatus {
    Ok = 0,
    ServerIdentityChanged = 1,
    AuthorizationFailed = 2,
    ProtocolError = 3,
    GenericError = 4,
}

impl InitStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        Some(match code {
            0 => InitStatus::Ok,
            1 => InitStatus::ServerIdentityChanged,
            2 => InitStatus::AuthorizationFailed,
            3 => InitStatus::ProtocolError,
            4 => InitStatus::GenericError,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_roundtrip() {
        for cmd in [
            Command::GetMode,
            Command::GetSize,
            Command::GetInformation,
            Command::FileDelete,
            Command::DirectoryDelete,
            Command::DirectoryCreate,
            Command::Rename,
            Command::SetTimes,
            Command::SetMode,
            Command::SymlinkCreate,
            Command::SymlinkQuery,
            Command::DirectoryEnum,
            Command::FileGet,
            Command::FilePut,
            Command::Stop,
            Command::IsBroken,
            Command::Error,
            Command::Unsupported,
        ] {
            assert_eq!(Command::from_u32(cmd.code()), Some(cmd));
        }
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(Command::from_u32(0), None);
        assert_eq!(Command::from_u32(99), None);
        assert_eq!(Command::from_u32(crate::VERSION_MAGIC), None);
        assert_eq!(InitStatus::from_u32(5), None);
    }

    #[test]
    fn test_init_status_roundtrip() {
        for status in [
            InitStatus::Ok,
            InitStatus::ServerIdentityChanged,
            InitStatus::AuthorizationFailed,
            InitStatus::ProtocolError,
            InitStatus::GenericError,
        ] {
            assert_eq!(InitStatus::from_u32(status.code()), Some(status));
        }
    }
}
