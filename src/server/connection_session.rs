//! Connection Session Layer: wires one client socket to the `TopicManager`.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::brokers::topic::message::Message;
use crate::brokers::topic::TopicManager;
use crate::server::socket_network::run_socket;

/// Serves one client until it disconnects.
///
/// Responses travel through an unbounded channel: long-poll completions are
/// sent from timer and producer tasks that must never block on a slow reader.
pub async fn handle_connection(
    socket: TcpStream,
    manager: Arc<TopicManager>,
    channel_capacity: usize,
) -> Result<(), String> {
    let session_id = Uuid::new_v4();
    let (reader, writer) = socket.into_split();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Message>(channel_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();

    let mut socket_task = tokio::spawn(run_socket(reader, writer, inbound_tx, outbound_rx));

    debug!("[Session] {} opened", session_id);

    let result = loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                match inbound {
                    Some(request) => manager.handle(request, &outbound_tx),
                    None => break Ok(()),
                }
            }
            socket_result = &mut socket_task => {
                break match socket_result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(format!("Protocol error: {}", err)),
                    Err(err) => Err(format!("Socket task error: {:?}", err)),
                };
            }
        }
    };

    debug!("[Session] {} closed", session_id);

    drop(outbound_tx);
    if !socket_task.is_finished() {
        let _ = socket_task.await;
    }
    result
}
