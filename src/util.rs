// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use std::fmt;

pub fn maybe_ascii(ascii: &[u8]) -> MaybeAscii {
    MaybeAscii(ascii)
}

pub struct MaybeAscii<'a>(&'a [u8]);

impl fmt::Display for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &byte in self.0 {
            if byte.is_ascii() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("\"")?;
        for &byte in self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        f.write_str("\"")?;
        Ok(())
    }
}

/// Name of this machine, falling back to `localhost` when unavailable
pub fn hostname() -> String {
    match hostname::get() {
        Err(err) => {
            log::warn!("Unable to get hostname, using localhost. {err}");
            "localhost".into()
        }
        Ok(name) => match name.into_string() {
            Err(name) => {
                log::warn!("Unable to use hostname {name:?}, using localhost");
                "localhost".into()
            }
            Ok(name) => name,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_escaped() {
        assert_eq!(maybe_ascii(b"QUIT\r\n").to_string(), "QUIT\r\n");
        assert_eq!(format!("{:?}", maybe_ascii(b"QUIT\r\n")), "\"QUIT\\x0d\\x0a\"");
        assert_eq!(maybe_ascii(b"\xff").to_string(), "\\xff");
    }
}
