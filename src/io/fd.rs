//! Non-blocking byte resource abstraction.

use std::os::fd::RawFd;

use nix::errno::Errno;
use thiserror::Error;

/// A transport fault carrying the platform error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (errno {code})")]
pub struct FdError {
    code: i32,
    message: String,
}

impl FdError {
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: std::io::Error::from_raw_os_error(code).to_string(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl From<Errno> for FdError {
    fn from(errno: Errno) -> Self {
        Self::from_code(errno as i32)
    }
}

impl From<std::io::Error> for FdError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_code(code),
            None => Self {
                code: Errno::EIO as i32,
                message: err.to_string(),
            },
        }
    }
}

/// A file-descriptor-like resource driven by a connection.
///
/// `read` and `write` never block: `Ok(None)` means the call would have
/// blocked, `Ok(Some(0))` from `read` means end of stream.
#[cfg_attr(test, mockall::automock)]
pub trait FdInterface {
    fn open(&mut self) -> Result<(), FdError>;
    fn close(&mut self) -> Result<(), FdError>;
    fn raw_fd(&self) -> RawFd;
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, FdError>;
    fn write(&mut self, buf: &[u8]) -> Result<Option<usize>, FdError>;
}
