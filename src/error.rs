//! Error taxonomy for the translation layer.
//!
//! Mirrors the shape used throughout the disk layer: a plain `Errno` enum plus
//! an `Error` that pairs it with a static message, rather than pulling in an
//! error-derive crate.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Errno {
    OutOfMemory,
    OutOfBounds,
    DeviceFull,
    Io,
    ReadOnly,
    DeviceDying,
    InvalidArgs,
    NotFound,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::OutOfMemory => "out of memory",
            Errno::OutOfBounds => "address out of bounds",
            Errno::DeviceFull => "device full",
            Errno::Io => "I/O error",
            Errno::ReadOnly => "zone is read-only",
            Errno::DeviceDying => "device is being removed",
            Errno::InvalidArgs => "invalid arguments",
            Errno::NotFound => "not found",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub fn new(errno: Errno) -> Self {
        Self { errno, msg: None }
    }

    pub fn with_msg(errno: Errno, msg: &'static str) -> Self {
        Self {
            errno,
            msg: Some(msg),
        }
    }

    pub fn errno(&self) -> Errno {
        self.errno
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{}: {}", self.errno, msg),
            None => write!(f, "{}", self.errno),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_errno_and_message() {
        let e = Error::with_msg(Errno::OutOfBounds, "lba beyond capacity");
        assert_eq!(e.errno(), Errno::OutOfBounds);
        assert!(format!("{}", e).contains("lba beyond capacity"));
    }
}
