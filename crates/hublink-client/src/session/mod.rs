//! Connection state machine
//!
//! The session task is the single authority on connection state: every
//! public operation, transition outcome, receiver item and timer tick is
//! applied here, one at a time. The submodules split the vocabulary
//! (`commands`), the bookkeeping (`state`), the serialized receiver
//! mutations (`receiver_ops`) and the task loop itself (`task`).

pub(crate) mod commands;
pub(crate) mod receiver_ops;
pub(crate) mod state;
pub(crate) mod task;

pub(crate) use commands::{ClientCommand, TokenInitiator};
pub(crate) use task::SessionTask;
