use crate::Error;

use courier_core::codec::{decode_hex, encode_hex};
use courier_core::Transport;
use serde::{Deserialize, Serialize};

/// The reference routed over the transport in place of the full envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Id of the envelope in the store.
    pub id: String,
}

impl Packet {
    /// Creates a packet referencing the given envelope id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Encodes the packet as hex text for the transport.
    ///
    /// # Errors
    /// Returns an error if the packet cannot be serialized.
    pub fn pack(&self) -> Result<String, Error> {
        Ok(encode_hex(self)?)
    }

    /// Decodes a packet received from the transport.
    ///
    /// # Errors
    /// Returns an error if `packed_packet` is not an encoded packet.
    pub fn unpack(packed_packet: &str) -> Result<Self, Error> {
        Ok(decode_hex(packed_packet)?)
    }
}

/// An inbound packet with its completion actions.
#[derive(Debug)]
pub struct PacketBag<T>
where
    T: Transport,
{
    packet: Packet,
    packed_packet: String,
    transport: T,
}

impl<T> PacketBag<T>
where
    T: Transport,
{
    pub(crate) const fn new(packet: Packet, packed_packet: String, transport: T) -> Self {
        Self {
            packet,
            packed_packet,
            transport,
        }
    }

    /// The decoded packet.
    #[must_use]
    pub const fn packet(&self) -> &Packet {
        &self.packet
    }

    /// The raw text the transport emitted.
    #[must_use]
    pub fn packed_packet(&self) -> &str {
        &self.packed_packet
    }

    /// Best-effort removal of the record from the transport.
    ///
    /// # Errors
    /// Returns the transport's error.
    pub async fn acknowledge(&self) -> Result<(), Error> {
        self.transport
            .remove(self.packed_packet.clone())
            .await
            .map_err(Error::transport)
    }

    /// Hands the same record back to the transport for redelivery.
    ///
    /// # Errors
    /// Returns the transport's error.
    pub async fn reject(&self) -> Result<(), Error> {
        self.transport
            .route(self.packed_packet.clone())
            .await
            .map_err(Error::transport)
    }
}
