//! Crate-wide error and on-wire status types.

use thiserror::Error;

/// Errors that can occur while running the server engine.
///
/// This is the "escape hatch" error type: anything that cannot be
/// mapped to a well-formed SMB error response (transport failures,
/// malformed framing, internal bugs) flows through here. Errors that
/// *can* be answered with a valid SMB response are represented as
/// [`SmbStatus`] instead and never unwind past a handler.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Binrw error: {0}")]
    BinRW(#[from] binrw::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Framed message exceeds the maximum allowed length ({0} bytes)")]
    TooLarge(usize),

    #[error("Pool is out of memory for a {0}-byte allocation")]
    OutOfPoolMemory(usize),

    #[error("Invalid session state for this operation: {0}")]
    InvalidState(String),

    #[error("Malformed SMB1 message: {0}")]
    Malformed(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// A condition the caller has already mapped to a specific wire
    /// status (resource exhaustion, unknown UID/TID/FID, and the like),
    /// so the dispatcher should write it back verbatim rather than
    /// re-deriving it from the taxonomy in spec §7.
    #[error("{0:?}")]
    Status(SmbStatus),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps any in-process error to the wire status an error response
    /// should carry (spec §7's taxonomy). Transport-level variants
    /// (`Io`, `ConnectionClosed`, ...) have no sensible wire status;
    /// callers must handle those by hanging up instead of calling this.
    pub fn to_status(&self) -> SmbStatus {
        match self {
            Error::Status(s) => *s,
            Error::Malformed(_) | Error::BinRW(_) => SmbStatus::UNRECOGNIZED_COMMAND,
            Error::InvalidState(_) => SmbStatus::SRV_NON_SPECIFIC_ERROR,
            Error::OutOfPoolMemory(_) => SmbStatus::NO_RESOURCES,
            Error::TooLarge(_) => SmbStatus::INVALID_PARAMETER,
            Error::Internal(_) | Error::Io(_) | Error::ConnectionClosed => SmbStatus::INTERNAL_ERROR,
        }
    }
}

/// The on-wire result of processing one SMB1 request.
///
/// Two parallel error spaces exist in SMB1 (MS-CIFS 2.2.1.4.2 /
/// 2.2.1.5.1); which one is written to the wire is selected per
/// response by the request's `FLG2_LONGERRORCODE` bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmbStatus {
    pub nt_status: u32,
    pub dos_class: u8,
    pub dos_code: u16,
}

impl SmbStatus {
    pub const SUCCESS: SmbStatus = SmbStatus::new(0x0000_0000, 0x00, 0x0000);

    pub const fn new(nt_status: u32, dos_class: u8, dos_code: u16) -> Self {
        SmbStatus {
            nt_status,
            dos_class,
            dos_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.nt_status == 0
    }
}

/// DOS error classes (MS-CIFS 2.2.1.4.2).
pub mod dos_class {
    pub const SUCCESS: u8 = 0x00;
    pub const ERR_DOS: u8 = 0x01;
    pub const ERR_SRV: u8 = 0x02;
    pub const ERR_HRD: u8 = 0x03;
}

macro_rules! statuses {
    ($($name:ident = ($nt:expr, $class:expr, $code:expr)),* $(,)?) => {
        impl SmbStatus {
            $(pub const $name: SmbStatus = SmbStatus::new($nt, $class, $code);)*
        }
    };
}

// Canonical status table (spec.md §7). DOS fallbacks follow the
// classic LanMan mapping used by MS-CIFS-era servers.
statuses! {
    INVALID_PARAMETER = (0xC000_000D, dos_class::ERR_DOS, 87),
    ACCESS_DENIED = (0xC000_0022, dos_class::ERR_DOS, 5),
    OBJECT_NAME_NOT_FOUND = (0xC000_0034, dos_class::ERR_DOS, 2),
    OBJECT_PATH_NOT_FOUND = (0xC000_003A, dos_class::ERR_DOS, 3),
    LOGON_FAILURE = (0xC000_006D, dos_class::ERR_DOS, 1240),
    NO_SUCH_FILE = (0xC000_000F, dos_class::ERR_DOS, 2),
    FILE_IS_A_DIRECTORY = (0xC000_0102, dos_class::ERR_DOS, 5),
    SHARING_VIOLATION = (0xC000_0043, dos_class::ERR_DOS, 32),
    TOO_MANY_OPENED_FILES = (0xC000_011F, dos_class::ERR_DOS, 4),
    NOT_SUPPORTED = (0xC000_00BB, dos_class::ERR_DOS, 50),
    INSUFFICIENT_RESOURCES = (0xC000_009A, dos_class::ERR_SRV, 1),
    UNRECOGNIZED_COMMAND = (0xC000_0010, dos_class::ERR_SRV, 2),
    INVALID_TID = (0xC000_00B4, dos_class::ERR_SRV, 4),
    INVALID_HANDLE = (0xC000_0008, dos_class::ERR_DOS, 6),
    NO_MORE_FILES = (0x8000_0006, dos_class::ERR_DOS, 18),
    SRV_NON_SPECIFIC_ERROR = (0xC000_0001, dos_class::ERR_SRV, 1),
    HRD_READ_FAULT = (0xC000_009C, dos_class::ERR_HRD, 30),
    HRD_WRITE_FAULT = (0xC000_009C, dos_class::ERR_HRD, 29),
    TOO_MANY_CONNECTIONS = (0xC000_0099, dos_class::ERR_SRV, 6),
    NO_RESOURCES = (0xC000_009A, dos_class::ERR_SRV, 1),
    CANCELLED = (0xC000_0120, dos_class::ERR_SRV, 1),
    INTERNAL_ERROR = (0xC000_0002, dos_class::ERR_SRV, 1),
    DISK_FULL = (0xC000_007F, dos_class::ERR_DOS, 39),
}
