// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Implementation of [RFC 2033](
//! https://datatracker.ietf.org/doc/html/rfc2033): Local Mail Transfer Protocol

pub mod handler;
pub mod proto;
pub mod server;
mod syntax;

pub use self::{handler::{DeliveryError, Handler}, server::{Server, Stopper}};
