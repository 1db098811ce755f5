pub mod packet;

pub use packet::{HeaderHashEntry, Packet, PeerState};
