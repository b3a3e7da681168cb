//! Serve the demo application.

use anyhow::Result;
use colored::Colorize;
use tether_rpc::demo;
use tether_rpc::rpc::Server;
use tracing::info;

use crate::config::Config;

pub fn run(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server;
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let handle = Server::new(server_config, demo::app()).start().await?;
        println!(
            "{} Serving {} on {}",
            "ready".green().bold(),
            demo::DOCUMENT_ID,
            handle.local_addr()
        );

        let context = handle.context().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                context.request_shutdown();
            }
        });

        handle.wait().await?;
        println!("{} Server stopped", "done".green().bold());
        Ok(())
    })
}
