//! Connection broker: name validation, registration, peer discovery and
//! forwarding of direct-connection requests.
//!
//! The server only introduces peers. Admission of direct connections
//! (one inbound connection per peer) is enforced peer-side, see
//! `peer::direct::DirectSlot`.

use tracing::{debug, info};

use super::effect::Effect;
use crate::error::{Error, Result};
use crate::protocol::{
    ConnectKind, ConnectRequest, JoinRequest, NameRequest, PeerAddress, PeerConnectRequest,
    PeerList, ServerMessage, ValidUsername,
};
use crate::session::{ChannelHandle, ChannelId, PeerSession, SessionRegistry};

/// Answer `valid-username`; a taken name also closes the channel
pub fn validate_username(
    registry: &SessionRegistry,
    channel: &ChannelHandle,
    request: &NameRequest,
) -> Vec<Effect> {
    let valid = registry.validate_name(&request.name);
    let reply = Effect::send(channel, ServerMessage::ValidUsername(ValidUsername { valid }));

    if valid {
        vec![reply]
    } else {
        info!(name = %request.name, channel = %channel.id(), "Name already taken, closing channel");
        vec![reply, Effect::Close { channel: channel.clone() }]
    }
}

/// Register the sender under `request.name`, replacing any stale session
pub fn join(registry: &mut SessionRegistry, channel: &ChannelHandle, request: &JoinRequest) -> Result<Vec<Effect>> {
    if request.name.is_empty() {
        return Err(Error::malformed_request("join requires a non-empty name"));
    }

    let replaced = registry.join(&request.name, &request.direct_address, channel.clone());

    match replaced {
        Some(old) if old.channel != *channel => info!(
            name = %request.name,
            address = %request.direct_address,
            stale_channel = %old.channel.id(),
            "Peer re-joined, replaced stale session"
        ),
        _ => info!(
            name = %request.name,
            address = %request.direct_address,
            peers = registry.len(),
            "Peer joined"
        ),
    }

    Ok(Vec::new())
}

/// Send every registered peer the list of the others
pub fn peers_list(registry: &SessionRegistry) -> Vec<Effect> {
    registry
        .sessions()
        .map(|session| {
            Effect::send(
                &session.channel,
                ServerMessage::Peers(PeerList {
                    peers: registry.list(Some(&session.name)),
                }),
            )
        })
        .collect()
}

/// Forward a collaborative `connect-request` to the receiver
pub fn request_connection(registry: &SessionRegistry, request: &PeerConnectRequest) -> Result<Vec<Effect>> {
    let receiver = registry
        .get(&request.receiver_name)
        .ok_or_else(|| Error::peer_not_found(&request.receiver_name))?;

    debug!(
        requestor = %request.requestor_name,
        receiver = %request.receiver_name,
        "Forwarding connection request"
    );

    Ok(vec![Effect::send(
        &receiver.channel,
        ServerMessage::ConnectRequest(ConnectRequest {
            requestor: request.requestor_name.clone(),
            payload: request.payload.clone(),
            kind: ConnectKind::Collaborative,
        }),
    )])
}

/// Look up a peer's direct address for the requester
pub fn resolve_address(
    registry: &SessionRegistry,
    channel: &ChannelHandle,
    request: &NameRequest,
) -> Result<Vec<Effect>> {
    let session = registry
        .get(&request.name)
        .ok_or_else(|| Error::peer_not_found(&request.name))?;

    Ok(vec![Effect::send(
        channel,
        ServerMessage::PeerIdValue(PeerAddress {
            name: session.name.clone(),
            address: session.direct_address.clone(),
        }),
    )])
}

/// Drop the sessions of a closed channel.
///
/// Returns the removed sessions and the best-effort `clear-cache` notice
/// followed by a close, which also stops the channel's writer task.
pub fn disconnect(registry: &mut SessionRegistry, channel: &ChannelHandle) -> (Vec<PeerSession>, Vec<Effect>) {
    let removed = registry.remove(channel.id());
    for session in &removed {
        info!(name = %session.name, peers = registry.len(), "Peer left");
    }

    let mut effects = Vec::new();
    if !removed.is_empty() {
        effects.push(Effect::send(channel, ServerMessage::ClearCache));
    }
    effects.push(Effect::Close { channel: channel.clone() });

    (removed, effects)
}

/// Names registered on a channel, for log context
pub fn names_on(registry: &SessionRegistry, channel: ChannelId) -> String {
    let names = registry.names_on(channel);
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn join_peer(registry: &mut SessionRegistry, name: &str) -> ChannelHandle {
        let (channel, _rx) = ChannelHandle::new(8);
        join(
            registry,
            &channel,
            &JoinRequest {
                name: name.to_string(),
                direct_address: format!("10.0.0.1:{}", 7000 + name.len()),
            },
        )
        .unwrap();
        channel
    }

    fn name(value: &str) -> NameRequest {
        NameRequest { name: value.to_string() }
    }

    #[test]
    fn test_validate_free_name() {
        let registry = SessionRegistry::new();
        let (channel, _rx) = ChannelHandle::new(8);

        let effects = validate_username(&registry, &channel, &name("a"));
        assert_eq!(
            effects,
            vec![Effect::send(&channel, ServerMessage::ValidUsername(ValidUsername { valid: true }))]
        );
    }

    #[test]
    fn test_validate_taken_name_closes() {
        let mut registry = SessionRegistry::new();
        join_peer(&mut registry, "a");
        let (channel, _rx) = ChannelHandle::new(8);

        let effects = validate_username(&registry, &channel, &name("a"));
        assert_eq!(effects.len(), 2);
        assert_eq!(
            effects[0],
            Effect::send(&channel, ServerMessage::ValidUsername(ValidUsername { valid: false }))
        );
        assert_eq!(effects[1], Effect::Close { channel: channel.clone() });
    }

    #[test]
    fn test_join_rejects_empty_name() {
        let mut registry = SessionRegistry::new();
        let (channel, _rx) = ChannelHandle::new(8);

        let err = join(
            &mut registry,
            &channel,
            &JoinRequest {
                name: String::new(),
                direct_address: "10.0.0.1:7000".to_string(),
            },
        )
        .unwrap_err();

        assert!(matches!(err, Error::MalformedRequest { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_peers_list_excludes_recipient() {
        let mut registry = SessionRegistry::new();
        let a = join_peer(&mut registry, "a");
        let b = join_peer(&mut registry, "b");

        let effects = peers_list(&registry);
        assert_eq!(
            effects,
            vec![
                Effect::send(&a, ServerMessage::Peers(PeerList { peers: vec!["b".to_string()] })),
                Effect::send(&b, ServerMessage::Peers(PeerList { peers: vec!["a".to_string()] })),
            ]
        );
    }

    #[test]
    fn test_request_connection_forwards_payload() {
        let mut registry = SessionRegistry::new();
        join_peer(&mut registry, "a");
        let b = join_peer(&mut registry, "b");

        let effects = request_connection(
            &registry,
            &PeerConnectRequest {
                requestor_name: "a".to_string(),
                receiver_name: "b".to_string(),
                payload: json!({"topic": "sensors"}),
            },
        )
        .unwrap();

        assert_eq!(
            effects,
            vec![Effect::send(
                &b,
                ServerMessage::ConnectRequest(ConnectRequest {
                    requestor: "a".to_string(),
                    payload: json!({"topic": "sensors"}),
                    kind: ConnectKind::Collaborative,
                })
            )]
        );
    }

    #[test]
    fn test_request_connection_unknown_receiver() {
        let registry = SessionRegistry::new();
        let err = request_connection(
            &registry,
            &PeerConnectRequest {
                requestor_name: "a".to_string(),
                receiver_name: "ghost".to_string(),
                payload: json!(null),
            },
        )
        .unwrap_err();

        assert!(matches!(err, Error::PeerNotFound { ref name } if name == "ghost"));
    }

    #[test]
    fn test_resolve_address_replies_to_requester() {
        let mut registry = SessionRegistry::new();
        let a = join_peer(&mut registry, "a");
        join_peer(&mut registry, "bb");

        let effects = resolve_address(&registry, &a, &name("bb")).unwrap();
        assert_eq!(
            effects,
            vec![Effect::send(
                &a,
                ServerMessage::PeerIdValue(PeerAddress {
                    name: "bb".to_string(),
                    address: "10.0.0.1:7002".to_string(),
                })
            )]
        );

        assert!(resolve_address(&registry, &a, &name("ghost")).is_err());
    }

    #[test]
    fn test_disconnect_removes_and_closes() {
        let mut registry = SessionRegistry::new();
        let a = join_peer(&mut registry, "a");

        let (removed, effects) = disconnect(&mut registry, &a);
        assert_eq!(removed.len(), 1);
        assert_eq!(
            effects,
            vec![
                Effect::send(&a, ServerMessage::ClearCache),
                Effect::Close { channel: a.clone() },
            ]
        );

        // Second call finds nothing but still closes
        let (removed, effects) = disconnect(&mut registry, &a);
        assert!(removed.is_empty());
        assert_eq!(effects, vec![Effect::Close { channel: a.clone() }]);
    }
}
