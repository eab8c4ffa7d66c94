use std::fmt::{self, Debug, Display};
use std::io;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Returned from `main` so fatal errors print as a single readable line.
pub struct DisplayError(Error);

impl Debug for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T: Into<Error>> From<T> for DisplayError {
    fn from(display: T) -> Self {
        DisplayError(display.into())
    }
}

pub trait IoErrorExt {
    fn applies_to(&self) -> AppliesTo;
}

impl IoErrorExt for io::Error {
    fn applies_to(&self) -> AppliesTo {
        match self.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => AppliesTo::Connection,
            _ => AppliesTo::Listener,
        }
    }
}

/// Whether an error is routine for one peer, or says something about our own socket.
#[derive(Debug, PartialEq, Eq)]
pub enum AppliesTo {
    Connection,
    Listener,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_errors_apply_to_connection() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            assert_eq!(io::Error::from(kind).applies_to(), AppliesTo::Connection);
        }
    }

    #[test]
    fn resource_errors_apply_to_listener() {
        let e = io::Error::other("too many open files");
        assert_eq!(e.applies_to(), AppliesTo::Listener);
    }

    #[test]
    fn display_error_debug_is_display() {
        let e = DisplayError::from("no forwards configured");
        assert_eq!(format!("{:?}", e), "no forwards configured");
    }
}
