//! UDP delivery of search results for active-mode searchers.

use tokio::net::UdpSocket;

use super::TransportError;
use super::transport::{FrameBuffer, Inbound};
use crate::events::{Event, EventBus};
use crate::protocol::{Message, SearchResult};

/// Sends one `$SR` datagram per result to `address:port`.
///
/// A fresh socket is bound for the batch and dropped afterwards.
pub async fn send_search_results(
    address: &str,
    port: u16,
    results: &[SearchResult],
) -> Result<usize, TransportError> {
    if results.is_empty() {
        return Ok(0);
    }

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect((address, port)).await?;

    for result in results {
        let datagram = Message::SearchResult(result.clone()).to_wire();
        socket.send(&datagram).await?;
    }

    tracing::debug!(
        "Sent {} search results to {}:{}",
        results.len(),
        address,
        port
    );
    Ok(results.len())
}

/// Receives `$SR` datagrams and publishes them as search results.
///
/// Runs until the socket fails; non-result datagrams are ignored.
pub async fn run_search_listener(socket: UdpSocket, events: EventBus) -> Result<(), TransportError> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let mut frames = FrameBuffer::new();
        frames.push(&buf[..len]);
        if !buf[..len].ends_with(b"|") {
            frames.push(b"|");
        }

        while let Some(inbound) = frames.next_inbound() {
            match inbound {
                Inbound::Frame(Message::SearchResult(result)) => {
                    events.publish(Event::SearchResult(result));
                }
                Inbound::Frame(other) => {
                    tracing::debug!("Ignoring datagram from {}: {}", from, other.name());
                }
                Inbound::Raw(_) => {}
            }
        }
    }
}
