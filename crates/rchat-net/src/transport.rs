use libp2p::identity::Keypair;
use tracing::info;

/// Build the swarm: TCP and QUIC transports, Noise handshake authenticated
/// by the node's Ed25519 identity, yamux multiplexing on TCP.
pub fn build_swarm(
    keypair: Keypair,
) -> anyhow::Result<libp2p::Swarm<super::behaviour::RchatBehaviour>> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Duration;

    use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
    use libp2p::request_response::{self, ProtocolSupport};
    use libp2p::{identify, noise, ping, StreamProtocol, SwarmBuilder};

    use rchat_shared::constants::{
        CHUNK_TIMEOUT_SECS, FRAME_TIMEOUT_SECS, FILE_PROTOCOL, GOSSIPSUB_HEARTBEAT_SECS,
        IDENTIFY_PROTOCOL, MAX_FRAME_SIZE, MSG_PROTOCOL,
    };

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default(),
            noise::Config::new,
            libp2p::yamux::Config::default,
        )?
        .with_quic()
        .with_behaviour(|key| -> std::result::Result<super::behaviour::RchatBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            // Content-addressed message ids keep duplicate gossip out of
            // the mesh even when two peers republish the same offer.
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = DefaultHasher::new();
                message.data.hash(&mut hasher);
                if let Some(ref source) = message.source {
                    source.hash(&mut hasher);
                }
                MessageId::from(hasher.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_FRAME_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("GossipSub config: {e}").into()
                })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                format!("GossipSub init: {e}").into()
            })?;

            let identify_config =
                identify::Config::new(IDENTIFY_PROTOCOL.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            let ping = ping::Behaviour::default();

            let messaging = request_response::cbor::Behaviour::new(
                [(StreamProtocol::new(MSG_PROTOCOL), ProtocolSupport::Full)],
                request_response::Config::default()
                    .with_request_timeout(Duration::from_secs(FRAME_TIMEOUT_SECS)),
            );

            let file_transfer = request_response::cbor::Behaviour::new(
                [(StreamProtocol::new(FILE_PROTOCOL), ProtocolSupport::Full)],
                request_response::Config::default()
                    .with_request_timeout(Duration::from_secs(CHUNK_TIMEOUT_SECS)),
            );

            Ok(super::behaviour::RchatBehaviour {
                gossipsub,
                identify,
                ping,
                messaging,
                file_transfer,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built rchat swarm with TCP + QUIC transport"
    );

    Ok(swarm)
}
