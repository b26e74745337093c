// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-payload seam of the coordinator.
//!
//! Frames in the `"-"` family are handed to a [`Payload`] collaborator
//! owned by the node, with a [`PayloadLink`] capability for answering.
//! The clock synchronizer is one such collaborator.

use crate::ser::{Chunk, Stream};
use crate::transport::ConnectionId;

/// Send capability handed to a [`Payload`] alongside each frame. All
/// methods prepend the payload family tag; bodies start at the sub-tag.
pub trait PayloadLink {
    /// Send to one of our clients (coordinator role).
    fn send_to_client(&self, id: ConnectionId, body: Chunk) -> bool;

    /// Broadcast to all of our clients (coordinator role).
    fn send_from_server(&self, body: Chunk) -> bool;

    /// Send to the coordinator we are a client of.
    fn send_from_client(&self, body: Chunk) -> bool;

    /// True while this node is a connected, confirmed client.
    fn client_connected(&self) -> bool;
}

/// Handler for application payloads, dispatched by node role.
///
/// Invoked from transport ingress threads; implementations must be
/// thread-safe. The stream cursor sits just past the family tag.
pub trait Payload: Send + Sync {
    /// A payload frame arrived on one of our inbound links.
    fn on_server_payload(&self, link: &dyn PayloadLink, id: ConnectionId, stream: &mut Stream<'_>);

    /// A payload frame arrived from our coordinator.
    fn on_client_payload(&self, link: &dyn PayloadLink, stream: &mut Stream<'_>);
}

/// Payload handler that drops every frame. Used by nodes that only take
/// part in grouping and election.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPayload;

impl Payload for NullPayload {
    fn on_server_payload(
        &self,
        _link: &dyn PayloadLink,
        _id: ConnectionId,
        _stream: &mut Stream<'_>,
    ) {
    }

    fn on_client_payload(&self, _link: &dyn PayloadLink, _stream: &mut Stream<'_>) {}
}
