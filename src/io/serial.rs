//! Serial port resource for the powerline modem.
//!
//! The modem speaks 19200 baud 8N1. The port is opened without becoming the
//! controlling terminal, switched to raw mode and made non-blocking.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, SetArg, SpecialCharacterIndices,
};

use super::fd::{FdError, FdInterface};

pub struct SerialFd {
    path: PathBuf,
    file: Option<File>,
}

impl SerialFd {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, FdError> {
        self.file.as_mut().ok_or(FdError::from(Errno::EBADF))
    }
}

fn configure(file: &File) -> Result<(), FdError> {
    let mut tio = termios::tcgetattr(file)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, BaudRate::B19200)?;
    tio.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    tio.input_flags |= InputFlags::IGNBRK | InputFlags::IGNPAR;
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcflush(file, FlushArg::TCIOFLUSH)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &tio)?;
    Ok(())
}

impl FdInterface for SerialFd {
    fn open(&mut self) -> Result<(), FdError> {
        self.file = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
            .open(&self.path)?;
        configure(&file)?;
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<(), FdError> {
        self.file = None;
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_ref().map_or(-1, |file| file.as_raw_fd())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, FdError> {
        match self.file()?.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<Option<usize>, FdError> {
        match self.file()?.write(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
