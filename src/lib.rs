// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! LMTP delivery endpoint on a UNIX socket

pub mod config;
pub mod lmtp;
pub mod spool;
mod util;
