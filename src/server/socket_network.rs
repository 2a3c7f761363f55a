//! Socket Network Layer: framed I/O for a single connection.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::brokers::topic::message::Message;
use crate::server::protocol::{BrokerCodec, ParseError};

/// Decodes inbound messages into `inbound_tx` and writes everything received
/// on `outbound_rx`. Ends when the peer closes or either channel is gone.
pub async fn run_socket<R, W>(
    reader: R,
    writer: W,
    inbound_tx: mpsc::Sender<Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) -> Result<(), ParseError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed_reader = FramedRead::new(reader, BrokerCodec::new());
    let mut framed_writer = FramedWrite::new(writer, BrokerCodec::new());

    loop {
        tokio::select! {
            frame = framed_reader.next() => {
                match frame {
                    Some(Ok(message)) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => break,
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => framed_writer.send(message).await?,
                    None => break,
                }
            }
        }
    }

    Ok(())
}
