//! The router task.
//!
//! One task owns the [`SignalingRouter`] and the outbound queue of every connection.
//! Connection handlers talk to it through [`RouterHandle`]; commands are applied one at a
//! time, so registry and call-book updates never interleave.

use crate::router::{Delivery, RouterStats, SignalingRouter, Target};
use huddle_common::error::{HuddleError, HuddleResult};
use huddle_common::ids::ConnectionId;
use huddle_common::protocol::{ClientEvent, ServerEvent};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Commands sent to the router task.
#[derive(Debug)]
pub enum RouterCommand {
    /// A socket opened. `outbound` feeds that socket's writer.
    Connect {
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    },
    /// A parsed client event.
    Inbound {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    /// Push an event straight to one connection (parse errors and the like).
    Direct {
        connection_id: ConnectionId,
        event: ServerEvent,
    },
    /// The socket closed.
    Disconnect { connection_id: ConnectionId },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
}

/// Cloneable handle to the router task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Spawn the router task and return a handle to it.
    pub fn spawn(router: SignalingRouter) -> Self {
        let (tx, rx) = mpsc::channel::<RouterCommand>(1024);
        tokio::spawn(async move {
            run_router(router, rx).await;
            tracing::info!("Router task shut down");
        });
        Self { tx }
    }

    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> HuddleResult<()> {
        self.send(RouterCommand::Connect {
            connection_id,
            outbound,
        })
        .await
    }

    pub async fn inbound(&self, connection_id: ConnectionId, event: ClientEvent) -> HuddleResult<()> {
        self.send(RouterCommand::Inbound {
            connection_id,
            event,
        })
        .await
    }

    pub async fn direct(&self, connection_id: ConnectionId, event: ServerEvent) -> HuddleResult<()> {
        self.send(RouterCommand::Direct {
            connection_id,
            event,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> HuddleResult<()> {
        self.send(RouterCommand::Disconnect { connection_id }).await
    }

    pub async fn stats(&self) -> HuddleResult<RouterStats> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HuddleError::Unavailable("router"))
    }

    async fn send(&self, cmd: RouterCommand) -> HuddleResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| HuddleError::Unavailable("router"))
    }
}

async fn run_router(mut router: SignalingRouter, mut cmd_rx: mpsc::Receiver<RouterCommand>) {
    let mut outbound: HashMap<ConnectionId, mpsc::Sender<ServerEvent>> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RouterCommand::Connect {
                connection_id,
                outbound: tx,
            } => {
                outbound.insert(connection_id, tx);
                tracing::debug!(connection = %connection_id, open = outbound.len(), "Connection registered");
            }

            RouterCommand::Inbound {
                connection_id,
                event,
            } => {
                let deliveries = router.handle(connection_id, event);
                flush(&mut router, &mut outbound, deliveries);
            }

            RouterCommand::Direct {
                connection_id,
                event,
            } => {
                flush(
                    &mut router,
                    &mut outbound,
                    vec![Delivery {
                        target: Target::Connection(connection_id),
                        event,
                    }],
                );
            }

            RouterCommand::Disconnect { connection_id } => {
                outbound.remove(&connection_id);
                router.disconnect(connection_id);
                let deliveries = router.take_deliveries();
                flush(&mut router, &mut outbound, deliveries);
                tracing::debug!(connection = %connection_id, open = outbound.len(), "Connection released");
            }

            RouterCommand::Stats { reply } => {
                let _ = reply.send(router.stats());
            }
        }
    }
}

/// Deliver, then evict every connection whose queue overflowed.
///
/// Eviction drops the connection's sender, so its writer drains what is queued and
/// closes the socket. The router settles the connection's calls right away, which may
/// queue more events and evict further connections.
fn flush(
    router: &mut SignalingRouter,
    outbound: &mut HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    deliveries: Vec<Delivery>,
) {
    let mut overflowed = deliver(outbound, deliveries);

    while let Some(connection_id) = overflowed.pop() {
        if outbound.remove(&connection_id).is_none() {
            continue;
        }
        tracing::warn!(connection = %connection_id, "Outbound queue full; closing connection");
        router.disconnect(connection_id);
        overflowed.extend(deliver(outbound, router.take_deliveries()));
    }
}

/// Queue deliveries without waiting. Returns the connections whose queue was full.
fn deliver(
    outbound: &HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    deliveries: Vec<Delivery>,
) -> Vec<ConnectionId> {
    let mut overflowed = Vec::new();
    for Delivery { target, event } in deliveries {
        match target {
            Target::Connection(connection_id) => {
                if let Some(tx) = outbound.get(&connection_id) {
                    if !push(connection_id, tx, event) {
                        overflowed.push(connection_id);
                    }
                }
            }
            Target::Broadcast => {
                for (connection_id, tx) in outbound {
                    if !push(*connection_id, tx, event.clone()) {
                        overflowed.push(*connection_id);
                    }
                }
            }
        }
    }
    overflowed.sort();
    overflowed.dedup();
    overflowed
}

/// False when the queue is full.
fn push(connection_id: ConnectionId, tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::debug!(
                connection = %connection_id,
                event = event.name(),
                "Outbound queue full"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::trace!(connection = %connection_id, "Outbound queue closed");
            true
        }
    }
}
