// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Application callbacks invoked by an LMTP connection

use std::io;
use thiserror::Error;

/// Reply given to pre-DATA commands when the handler has no opinion
pub const DEFAULT_REPLY: &str = "250 2.1.0 ok";

pub trait Handler {
    /// Accept a complete message
    ///
    /// `message` has transparency removed and every line terminated with
    /// CRLF. Returning an error rejects the message and closes the connection.
    fn deliver(&mut self, message: &[u8]) -> Result<(), DeliveryError>;

    /// Produce a reply for one pre-DATA command line (without terminator)
    ///
    /// A reply to `RCPT` beginning with `2` counts as an accepted recipient.
    fn line(&mut self, line: &str) -> String {
        let _ = line;
        DEFAULT_REPLY.to_string()
    }
}

impl<F> Handler for F
where
    F: FnMut(&[u8]) -> Result<(), DeliveryError>,
{
    fn deliver(&mut self, message: &[u8]) -> Result<(), DeliveryError> {
        self(message)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DeliveryError {
    /// Short name of the failure's kind, reported to the client
    pub fn category(&self) -> &'static str {
        match self {
            DeliveryError::Rejected(_) => "Rejected",
            DeliveryError::Io(_) => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_accept_everything_by_default() {
        let mut count = 0;
        let mut handler = |_: &[u8]| {
            count += 1;
            Ok::<_, DeliveryError>(())
        };

        assert_eq!(handler.line("MAIL FROM:<x@y>"), DEFAULT_REPLY);
        handler.deliver(b"hi\r\n").unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn categories() {
        let rejected = DeliveryError::Rejected("mailbox full".into());
        assert_eq!(rejected.category(), "Rejected");
        assert_eq!(rejected.to_string(), "mailbox full");

        let io = DeliveryError::from(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert_eq!(io.category(), "Io");
        assert_eq!(io.to_string(), "disk on fire");
    }
}
