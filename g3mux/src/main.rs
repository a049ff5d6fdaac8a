/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::{debug, info};
use tracing_subscriber::filter::LevelFilter;

use g3mux::config::MuxConfig;
use g3mux::module::grpc::GrpcServiceRegistryBuilder;
use g3mux::serve::MuxServer;

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        g3mux::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    let max_level = match proc_args.verbose_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(max_level).init();

    let config = g3mux::config::load(&proc_args.config_file).context(format!(
        "failed to load config file {}",
        proc_args.config_file.display()
    ))?;
    debug!("loaded config from {}", proc_args.config_file.display());

    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }

    tokio_run(config)
}

fn tokio_run(config: MuxConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    rt.block_on(async {
        // no methods registered at startup, unknown calls get UNIMPLEMENTED
        let registry = GrpcServiceRegistryBuilder::default().build();
        let server = MuxServer::new(config, registry)?;
        server.run().await
    })
}
