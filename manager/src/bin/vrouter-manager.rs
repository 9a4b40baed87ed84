// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the router manager against a simulated fleet

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use slog::info;
use slog::o;
use vrouter_common::FileKv;
use vrouter_manager::Config;
use vrouter_manager::SimServer;

#[derive(Debug, Parser)]
#[clap(name = "vrouter-manager", about = "Redundant virtual router manager")]
struct Args {
    #[clap(name = "CONFIG_FILE_PATH", action)]
    config_file_path: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config_file_path)
        .with_context(|| format!("loading {}", args.config_file_path))?;

    let log = config
        .log
        .to_logger("vrouter-manager")
        .context("initializing logger")?
        .new(o!(FileKv));

    let server = SimServer::start(&log, config)
        .await
        .context("starting router manager")?;
    info!(log, "router manager running";
        "node_id" => %server.manager.node_id(),
        "zone_id" => %server.fleet.zone_id(),
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!(log, "shutting down");
    server.shutdown().await;
    Ok(())
}
