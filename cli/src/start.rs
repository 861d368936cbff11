//! `rewind start` - run a server until interrupted

use anyhow::{Context, Result};
use rewind_process::{Collaborators, LaunchConfig, server_transitions, states};
use rewind_runtime::{CancelToken, Walker};

pub async fn run_start_command(mut config: LaunchConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.net.port = port;
    }
    let collaborators = Collaborators::local(&config);
    let graph = server_transitions(&config, &collaborators)?;

    // Ctrl-C during startup cancels the walk, which rolls back what was started.
    let cancel = CancelToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let reached = Walker::new(graph)
        .with_cancellation(cancel)
        .reach(states::server_endpoint())
        .await;
    interrupt.abort();

    let mut server = reached.context("Failed to start server")?;
    println!("Server listening on {}", server.value()?);
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tokio::task::block_in_place(|| server.release()).context("Failed to stop server")?;
    println!("Server stopped");
    Ok(())
}
