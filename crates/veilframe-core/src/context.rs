//! Per-connection key context.

use veilframe_crypto::{Direction, FrameKey, FrameOpener, FrameSealer, Tag};

use crate::ids::{ContactId, TransportId};

/// Everything one connection needs: who it is with, which period and
/// connection number it uses, and its frame key.
///
/// The frame key is erased when the context (or the sealer/opener built from
/// it) is dropped. Outgoing contexts also carry the tag to send.
#[derive(Debug)]
pub struct ConnectionContext {
    contact: ContactId,
    transport: TransportId,
    direction: Direction,
    period: u64,
    connection_number: u64,
    tag: Option<Tag>,
    frame_key: FrameKey,
}

impl ConnectionContext {
    pub(crate) fn outgoing(
        contact: ContactId,
        transport: TransportId,
        period: u64,
        connection_number: u64,
        tag: Tag,
        frame_key: FrameKey,
    ) -> Self {
        Self {
            contact,
            transport,
            direction: Direction::Outgoing,
            period,
            connection_number,
            tag: Some(tag),
            frame_key,
        }
    }

    pub(crate) fn incoming(
        contact: ContactId,
        transport: TransportId,
        period: u64,
        connection_number: u64,
        frame_key: FrameKey,
    ) -> Self {
        Self {
            contact,
            transport,
            direction: Direction::Incoming,
            period,
            connection_number,
            tag: None,
            frame_key,
        }
    }

    /// Contact at the other end.
    pub fn contact(&self) -> ContactId {
        self.contact
    }

    /// Transport the connection runs over.
    pub fn transport(&self) -> &TransportId {
        &self.transport
    }

    /// Whether we send or receive on this connection.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Rotation period the keys belong to.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Connection number within the period.
    pub fn connection_number(&self) -> u64 {
        self.connection_number
    }

    /// Tag to send first on an outgoing connection.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Sealer for an outgoing connection, with the tag to send before the
    /// first frame. `None` for incoming contexts.
    pub fn into_sealer(self) -> Option<(Tag, FrameSealer)> {
        let tag = self.tag?;
        Some((tag, FrameSealer::new(self.frame_key)))
    }

    /// Opener for an incoming connection. `None` for outgoing contexts.
    pub fn into_opener(self) -> Option<FrameOpener> {
        match self.direction {
            Direction::Incoming => Some(FrameOpener::new(self.frame_key)),
            Direction::Outgoing => None,
        }
    }

    /// Erase the keys now. Equivalent to dropping the context.
    pub fn erase(self) {}
}
