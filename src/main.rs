// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use anyhow::Result;
use tokio::signal;

use lmtp_server::{config, lmtp::Server, spool::Spool};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = config::load()?;
    let spool = Spool::new(&config.spool.directory)?;
    let mut server = Server::new(config.lmtp, spool)?;

    let stopper = server.stopper();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupted, stopping");
                stopper.stop();
            }
            Err(err) => log::error!("could not listen for Ctrl-C: {err}"),
        }
    });

    server.start().await
}
