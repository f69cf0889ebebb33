//! Per-connection writer task.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use log::{debug, warn};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::registry::Subscription;

/// Why a writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Every hub-side sender was dropped without closing the transport.
    QueueClosed,
    /// The hub evicted or unregistered the connection, or the reader
    /// side tore it down.
    TransportClosed,
    /// The socket refused a frame.
    SendFailed,
}

/// Sole owner of a socket's write half.
///
/// Drains the connection's queue in order, sends keepalive pings, and
/// cancels the connection's close signal on the way out so the reader
/// stops too.
pub struct ConnectionWriter<S, E> {
    sink: S,
    subscription: Subscription<E>,
    ping_interval: Duration,
}

impl<S, E> ConnectionWriter<S, E>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    E: Serialize,
{
    pub fn new(sink: S, subscription: Subscription<E>, ping_interval: Duration) -> Self {
        Self {
            sink,
            subscription,
            ping_interval,
        }
    }

    pub async fn run(self) -> WriterExit {
        let Self {
            mut sink,
            subscription,
            ping_interval,
        } = self;
        let Subscription {
            id,
            mut events,
            closed,
        } = subscription;

        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            let frame = tokio::select! {
                biased;
                _ = closed.cancelled() => break WriterExit::TransportClosed,
                event = events.recv() => match event {
                    Some(event) => match serde_json::to_string(&*event) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            warn!("Failed to serialize event for {}: {}", id, e);
                            continue;
                        }
                    },
                    None => break WriterExit::QueueClosed,
                },
                _ = ping.tick() => Message::Ping(Default::default()),
            };

            let sent = tokio::select! {
                biased;
                _ = closed.cancelled() => break WriterExit::TransportClosed,
                sent = sink.send(frame) => sent,
            };
            if let Err(e) = sent {
                debug!("Write to {} failed: {}", id, e);
                break WriterExit::SendFailed;
            }
        };

        closed.cancel();
        if exit != WriterExit::SendFailed {
            let _ = sink.send(Message::Close(None)).await;
        }
        let _ = sink.close().await;
        debug!("Writer for {} exited: {:?}", id, exit);
        exit
    }
}
