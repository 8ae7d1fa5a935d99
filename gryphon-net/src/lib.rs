mod mailbox;
mod rdma;
mod tcp;
mod ring;
mod ud;
mod wire;

pub use mailbox::Mailbox;
pub use rdma::{send_blocking, RdmaCluster, RdmaMailbox};
pub use ring::{write_with_retry, Ring, DEFAULT_RING_BYTES};
pub use tcp::{connect_pair_for_test, TcpMailbox};
pub use ud::{fragment, Reassembler, UD_MTU, UD_PACKET_DATA_LEN};
pub use wire::{NodeId, Notification, QueryMsg, StepType, Tid};
