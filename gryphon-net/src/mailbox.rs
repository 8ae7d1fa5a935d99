// The Mailbox contract (§4.5, §9 "Inheritance of Mailbox/TrxTableStub
// maps to a capability set"). One trait, two backends selected at
// construction (§9's tagged variant), rather than a base class.

use gryphon_base::Result;

use crate::wire::{NodeId, Notification, QueryMsg, Tid};

pub trait Mailbox: Send + Sync {
    /// Non-blocking for local destinations; for remote destinations
    /// attempts immediate transmission and falls back to the pending
    /// list on failure.
    fn send(&self, from_tid: Tid, msg: QueryMsg) -> Result<()>;

    /// Flushes `from_tid`'s pending remote messages. Called once per
    /// scheduling turn.
    fn sweep(&self, from_tid: Tid) -> Result<()>;

    /// Blocks until a message addressed to `tid` is available.
    fn recv(&self, tid: Tid) -> Result<QueryMsg>;

    /// Non-blocking poll, round-robining the local queue against every
    /// remote peer's incoming ring.
    fn try_recv(&self, tid: Tid) -> Result<Option<QueryMsg>>;

    fn send_notification(&self, dst_nid: NodeId, notification: &Notification) -> Result<()>;

    /// Blocks until a notification has fully reassembled.
    fn recv_notification(&self) -> Result<Notification>;

    fn try_recv_notification(&self) -> Result<Option<Notification>>;
}
