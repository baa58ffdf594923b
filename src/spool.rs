// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Delivery into a maildir-like spool directory
//!
//! Each message is written to `tmp/` and then renamed into `new/`, so readers
//! of `new/` never observe a partial message.

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}, process};
use time::OffsetDateTime;

use crate::{lmtp::{DeliveryError, Handler}, util};

pub struct Spool {
    directory: PathBuf,
    hostname: String,
    sequence: u64,
}

impl Spool {
    /// Open a spool, creating its directories if needed
    pub fn new(directory: impl AsRef<Path>) -> Result<Spool> {
        let directory = directory.as_ref().to_path_buf();

        for sub in ["tmp", "new"] {
            let path = directory.join(sub);
            fs::create_dir_all(&path)
                .with_context(|| format!("could not create spool directory {}", path.display()))?;
        }

        Ok(Spool {
            directory,
            hostname: util::hostname().replace('/', "\\057"),
            sequence: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Unique name for the next message
    fn next_name(&mut self) -> String {
        self.sequence += 1;
        format!(
            "{}.P{}Q{}.{}",
            OffsetDateTime::now_utc().unix_timestamp(),
            process::id(),
            self.sequence,
            self.hostname,
        )
    }
}

impl Handler for Spool {
    fn deliver(&mut self, message: &[u8]) -> Result<(), DeliveryError> {
        let name = self.next_name();
        let tmp = self.directory.join("tmp").join(&name);
        let new = self.directory.join("new").join(&name);

        fs::write(&tmp, message)?;

        if let Err(err) = fs::rename(&tmp, &new) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        log::info!("Spooled message {}", new.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn directory(name: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("lmtp-spool-{}-{name}", process::id()));
        let _ = fs::remove_dir_all(&path);
        path
    }

    fn messages(path: &Path) -> Vec<Vec<u8>> {
        let mut names = fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect::<Vec<_>>();
        names.sort();
        names.into_iter().map(|path| fs::read(path).unwrap()).collect()
    }

    #[test]
    fn messages_land_in_new() {
        let path = directory("deliver");
        let mut spool = Spool::new(&path).unwrap();
        assert_eq!(spool.directory(), path);

        spool.deliver(b"Subject: one\r\n\r\nhi\r\n").unwrap();
        spool.deliver(b"Subject: two\r\n\r\nhi\r\n").unwrap();

        let mut delivered = messages(&path.join("new"));
        delivered.sort();
        assert_eq!(delivered, [
            b"Subject: one\r\n\r\nhi\r\n".to_vec(),
            b"Subject: two\r\n\r\nhi\r\n".to_vec(),
        ]);
        assert!(messages(&path.join("tmp")).is_empty());

        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn names_are_unique() {
        let path = directory("names");
        let mut spool = Spool::new(&path).unwrap();

        let first = spool.next_name();
        let second = spool.next_name();
        assert_ne!(first, second);
        assert!(!first.contains('/'));

        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let path = directory("missing");
        let mut spool = Spool::new(&path).unwrap();
        fs::remove_dir_all(&path).unwrap();

        let err = spool.deliver(b"hi\r\n").unwrap_err();
        assert_eq!(err.category(), "Io");
    }
}
