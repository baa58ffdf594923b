//! Recognition of LMTP command lines and body lines

pub type Result<T, E = SyntaxError> = std::result::Result<T, E>;

#[derive(Debug)]
pub struct SyntaxError;

pub trait SliceExt<'a> {
    /// Advance this slice by `number` positions
    fn advance(&mut self, number: usize);

    /// Execute `f`, advancing `self` only if it succeeds
    fn atomic<T: 'a>(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<T>) -> Result<T>;

    /// Return `Ok(())` and advance this slice if it begins (case insensitive)
    /// with `needle`
    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()>;

    /// Return `Ok(())` if this slice is empty
    fn expect_empty(&self) -> Result<()>;

    /// Return longest prefix whose characters match `test`, advancing this
    /// slice by its length
    fn take_while(&mut self, test: impl FnMut(u8, usize) -> bool) -> &'a [u8];
}

impl<'a> SliceExt<'a> for &'a [u8] {
    fn atomic<T: 'a>(&mut self, f: impl FnOnce(&mut &'a [u8]) -> Result<T>) -> Result<T> {
        let mut cursor = *self;
        let value = f(&mut cursor)?;
        *self = cursor;
        Ok(value)
    }

    fn advance(&mut self, by: usize) {
        *self = &self[by..];
    }

    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()> {
        if needle.len() <= self.len() && self[..needle.len()].eq_ignore_ascii_case(needle) {
            self.advance(needle.len());
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn expect_empty(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn take_while(&mut self, mut test: impl FnMut(u8, usize) -> bool) -> &'a [u8] {
        let mut offset = 0;

        while offset < self.len() && test(self[offset], offset) {
            offset += 1;
        }

        let result = &self[..offset];
        self.advance(offset);
        result
    }
}

/// Remove a trailing CRLF or bare LF
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}

/// Command verb, i.e. everything up to the first space
pub fn verb(line: &[u8]) -> &[u8] {
    let mut line = strip_terminator(line);
    line.take_while(|c, _| c != b' ')
}

/// Parse `LHLO <client>`, returning the client's self-reported name
///
/// The name is the rest of the line, which may contain whitespace.
pub fn lhlo(line: &[u8]) -> Result<&[u8]> {
    let mut line = strip_terminator(line);

    line.atomic(|line| {
        line.expect_caseless(b"LHLO")?;

        if line.take_while(|c, _| c == b' ' || c == b'\t').is_empty() {
            return Err(SyntaxError);
        }

        let client = line.take_while(|_, _| true);
        let length = client.iter()
            .rposition(|c| !c.is_ascii_whitespace())
            .map_or(0, |offset| offset + 1);

        match &client[..length] {
            [] => Err(SyntaxError),
            client => Ok(client),
        }
    })
}

/// Is this line a `RCPT` command?
pub fn is_recipient(line: &[u8]) -> bool {
    verb(line).eq_ignore_ascii_case(b"RCPT")
}

/// Is this body line the end-of-data marker (a lone dot)?
pub fn is_end_of_data(line: &[u8]) -> bool {
    strip_terminator(line) == b"."
}

/// Undo transparency (RFC 5321 section 4.5.2) on a single body line
///
/// Returns line content without its terminator. Exactly one leading dot is
/// removed when it is followed by more content.
pub fn unstuff(line: &[u8]) -> &[u8] {
    let line = strip_terminator(line);

    match line {
        [b'.', rest @ ..] if !rest.is_empty() => rest,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators_are_stripped() {
        assert_eq!(strip_terminator(b"DATA\r\n"), b"DATA");
        assert_eq!(strip_terminator(b"DATA\n"), b"DATA");
        assert_eq!(strip_terminator(b"DATA"), b"DATA");
        assert_eq!(strip_terminator(b"DATA\r"), b"DATA\r");
    }

    #[test]
    fn lhlo_requires_argument() {
        assert_eq!(lhlo(b"LHLO mx.example.org\r\n").unwrap(), b"mx.example.org");
        assert_eq!(lhlo(b"lhlo a\n").unwrap(), b"a");
        assert!(lhlo(b"LHLO\r\n").is_err());
        assert!(lhlo(b"LHLO \r\n").is_err());
        assert!(lhlo(b"EHLO mx.example.org\r\n").is_err());
        assert!(lhlo(b"LHLOa\r\n").is_err());
        assert!(lhlo(b"LHLO \t \r\n").is_err());
        assert_eq!(lhlo(b"LHLO two words \r\n").unwrap(), b"two words");
        assert_eq!(lhlo(b"LHLO\ta\r\n").unwrap(), b"a");
    }

    #[test]
    fn recipient_commands() {
        assert!(is_recipient(b"RCPT TO:<p@q>\r\n"));
        assert!(is_recipient(b"rcpt to:<p@q>\r\n"));
        assert!(!is_recipient(b"MAIL FROM:<x@y>\r\n"));
        assert!(!is_recipient(b"RCPTX TO:<p@q>\r\n"));
    }

    #[test]
    fn dot_stuffing_is_removed_once() {
        assert_eq!(unstuff(b"..foo\r\n"), b".foo");
        assert_eq!(unstuff(b".foo\n"), b"foo");
        assert_eq!(unstuff(b"...\r\n"), b"..");
        assert_eq!(unstuff(b"foo.\r\n"), b"foo.");
        assert_eq!(unstuff(b"\r\n"), b"");
    }

    #[test]
    fn end_of_data() {
        assert!(is_end_of_data(b".\r\n"));
        assert!(is_end_of_data(b".\n"));
        assert!(!is_end_of_data(b"..\r\n"));
        assert!(!is_end_of_data(b". \r\n"));
    }
}
