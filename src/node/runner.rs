//! Wires a `ProtocolService` into tokio tasks: the round loop plus an inbound
//! dispatcher fed by the transport layer.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::consensus::types::Transaction;
use crate::consensus::ProtocolService;
use crate::network::{InboundMessage, NetworkClient};
use crate::node::service_handle::ServiceHandle;

/// Spawn the round loop and the inbound dispatcher.
///
/// The transport pushes every received protocol message and network event
/// into `inbound_rx`. `ServiceHandle::shutdown` stops the protocol and waits
/// for both tasks.
pub fn spawn<T, N>(protocol: Arc<ProtocolService<T, N>>, mut inbound_rx: mpsc::UnboundedReceiver<InboundMessage>) -> ServiceHandle
where
    T: Transaction,
    N: NetworkClient,
{
    let (mut svc_handle, shutdown_rx) = ServiceHandle::new();

    // Round loop
    {
        let protocol = protocol.clone();
        let h: JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
            protocol.start().await?;
            Ok(())
        });
        svc_handle.attach(h);
    }

    // Inbound dispatcher
    {
        let protocol = protocol.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let h: JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    message = inbound_rx.recv() => match message {
                        Some(message) => protocol.handle_inbound(&message),
                        None => {
                            info!("inbound channel closed");
                            break;
                        }
                    },
                }
            }
            info!(player_id = %protocol.local_player_id(), "inbound dispatcher shutting down");
            Ok(())
        });
        svc_handle.attach(h);
    }

    svc_handle.on_shutdown(move || protocol.stop());
    svc_handle
}
