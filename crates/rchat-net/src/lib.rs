// P2P networking layer built on libp2p with TCP + QUIC transports.

pub mod behaviour;
pub mod mdns;
pub mod peers;
pub mod rendezvous;
pub mod swarm;
pub mod transport;

pub use behaviour::{RchatBehaviour, RchatEvent};
pub use mdns::{spawn_mdns, MdnsEvent, MdnsPeer, MdnsService};
pub use peers::PeerTracker;
pub use swarm::{spawn_swarm, RequestError, SwarmCommand, SwarmNotification};
pub use transport::build_swarm;
