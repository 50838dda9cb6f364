use crate::{Error, Packet, PacketBag};

use courier_core::Transport;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Stream of decoded inbound packets.
pub type PacketBags<T> = BoxStream<'static, PacketBag<T>>;

struct RouteRequest {
    packed_packet: String,
    completion: oneshot::Sender<Result<(), String>>,
}

/// Framing layer over a transport.
///
/// Outbound packets go through a single worker that hands them to the
/// transport in order and skips a packet identical to the one routed just
/// before it. Inbound text is decoded into [`PacketBag`]s.
#[derive(Debug)]
pub struct Router<T>
where
    T: Transport,
{
    outbound: Mutex<Option<mpsc::UnboundedSender<RouteRequest>>>,
    transport: T,
}

impl<T> Router<T>
where
    T: Transport,
{
    /// Creates a closed router over `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            outbound: Mutex::new(None),
            transport,
        }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether `open` has been called without a matching `close`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    /// Opens the transport, starts the outbound worker and returns the inbound
    /// packets. Undecodable records are logged and skipped.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyOpen`] if the router is open, or the transport's
    /// error.
    pub async fn open(&self) -> Result<PacketBags<T>, Error> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        self.transport.open().await.map_err(Error::transport)?;
        let incoming = self.transport.incoming().await.map_err(Error::transport)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(outbound_worker(self.transport.clone(), receiver));
        *self.outbound.lock() = Some(sender);

        let transport = self.transport.clone();
        let packet_bags = incoming.filter_map(move |packed_packet| {
            let transport = transport.clone();

            async move {
                match Packet::unpack(&packed_packet) {
                    Ok(packet) => Some(PacketBag::new(packet, packed_packet, transport)),
                    Err(e) => {
                        warn!(packet = %packed_packet, error = %e, "dropping undecodable packet");
                        None
                    }
                }
            }
        });

        Ok(packet_bags.boxed())
    }

    /// Routes `packet`, resolving once the transport accepted or refused it.
    ///
    /// # Errors
    /// Returns [`Error::Closed`] if the router is not open and
    /// [`Error::Routing`] if the transport refused the packet.
    pub async fn route(&self, packet: &Packet) -> Result<(), Error> {
        let packed_packet = packet.pack()?;
        let sender = self.outbound.lock().clone().ok_or(Error::Closed("router"))?;
        let (completion, done) = oneshot::channel();

        sender
            .send(RouteRequest {
                packed_packet,
                completion,
            })
            .map_err(|_| Error::Closed("router"))?;

        done.await
            .map_err(|_| Error::Closed("router"))?
            .map_err(Error::Routing)
    }

    /// Stops the outbound worker once queued packets are handed over, and
    /// closes the transport, which ends the inbound stream.
    ///
    /// # Errors
    /// Returns the transport's error.
    pub async fn close(&self) -> Result<(), Error> {
        drop(self.outbound.lock().take());

        self.transport.close().await.map_err(Error::transport)
    }
}

async fn outbound_worker<T>(transport: T, mut requests: mpsc::UnboundedReceiver<RouteRequest>)
where
    T: Transport,
{
    let mut last_routed: Option<String> = None;

    while let Some(RouteRequest {
        packed_packet,
        completion,
    }) = requests.recv().await
    {
        let result = if last_routed.as_deref() == Some(packed_packet.as_str()) {
            debug!(packet = %packed_packet, "skipping consecutive duplicate packet");
            Ok(())
        } else {
            match transport.route(packed_packet.clone()).await {
                Ok(()) => {
                    last_routed = Some(packed_packet);
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        };

        // The caller may have given up waiting.
        let _ = completion.send(result);
    }

    debug!("router outbound worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use courier_transport_memory::MemoryTransport;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_route_round_trip() {
        let _ = tracing_subscriber::fmt::try_init();

        let router = Router::new(MemoryTransport::new());
        let mut packet_bags = router.open().await.unwrap();

        router.route(&Packet::new("e1")).await.unwrap();

        let packet_bag = timeout(Duration::from_secs(1), packet_bags.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet_bag.packet(), &Packet::new("e1"));
    }

    #[tokio::test]
    async fn test_consecutive_duplicates_are_skipped() {
        let router = Router::new(MemoryTransport::new());
        let _packet_bags = router.open().await.unwrap();
        let bus = router.transport().bus().clone();

        router.route(&Packet::new("e1")).await.unwrap();
        router.route(&Packet::new("e1")).await.unwrap();
        assert_eq!(bus.len(), 1);

        router.route(&Packet::new("e2")).await.unwrap();
        router.route(&Packet::new("e1")).await.unwrap();
        assert_eq!(bus.len(), 3);
    }

    #[tokio::test]
    async fn test_undecodable_records_are_skipped() {
        let transport = MemoryTransport::new();
        let router = Router::new(transport.clone());
        let mut packet_bags = router.open().await.unwrap();

        transport.route("not a packet".to_string()).await.unwrap();
        router.route(&Packet::new("e3")).await.unwrap();

        let packet_bag = timeout(Duration::from_secs(1), packet_bags.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet_bag.packet().id, "e3");
    }

    #[tokio::test]
    async fn test_closed_router() {
        let router = Router::new(MemoryTransport::new());

        assert_matches!(
            router.route(&Packet::new("e1")).await,
            Err(Error::Closed("router"))
        );

        let mut packet_bags = router.open().await.unwrap();
        assert!(matches!(router.open().await, Err(Error::AlreadyOpen)));

        router.close().await.unwrap();
        assert!(!router.is_open());
        assert_matches!(
            router.route(&Packet::new("e1")).await,
            Err(Error::Closed("router"))
        );
        assert!(
            timeout(Duration::from_secs(1), packet_bags.next())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_routing_error() {
        let transport = MemoryTransport::new();
        let router = Router::new(transport.clone());
        let _packet_bags = router.open().await.unwrap();

        // Closing the shared transport behind the router's back.
        transport.close().await.unwrap();

        assert_matches!(
            router.route(&Packet::new("e1")).await,
            Err(Error::Routing(_))
        );
    }
}
