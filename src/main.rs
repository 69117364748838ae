use anyhow::{Context, Result};
use rfcomm_link::transport::BluerAdapter;
use rfcomm_link::{ConnectionController, LinkConfig, LinkEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let address = std::env::args()
        .nth(1)
        .context("usage: rfcomm-link <device address>")?;

    let config = LinkConfig::default();
    let adapter = BluerAdapter::open(&config.bluetooth).await?;
    let controller = ConnectionController::new(adapter, config);

    // Log state transitions
    let mut state_rx = controller.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            info!("[MAIN] State: {:?}", *state_rx.borrow_and_update());
        }
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    controller.connect(address.as_str(), event_tx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(LinkEvent::Connected) => {
                    info!("[MAIN] Connected to {}", address);
                    controller.send("A");
                }
                Some(LinkEvent::Message(bytes)) => {
                    info!("[MAIN] Received: {}", String::from_utf8_lossy(&bytes));
                }
                Some(LinkEvent::NotConnected(reason)) => {
                    warn!("[MAIN] Not connected: {}", reason);
                    break;
                }
                None => {
                    error!("[MAIN] Event channel closed");
                    break;
                }
            },

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = controller.try_send(line.into_bytes()).await {
                        warn!("[MAIN] Send failed: {}", e);
                    }
                }
                Ok(None) => {
                    info!("[MAIN] Input closed, disconnecting");
                    stdin_open = false;
                    controller.close();
                }
                Err(e) => {
                    error!("[MAIN] Failed to read input: {}", e);
                    stdin_open = false;
                    controller.close();
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("[MAIN] Interrupted, disconnecting");
                controller.close();
            }
        }
    }

    info!("[MAIN] Final state: {:?}", controller.state());
    controller.shutdown().await;
    Ok(())
}
