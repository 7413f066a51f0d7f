//! Exclusive resource: the loaded model shared by LoadModel, Ask and
//! Release jobs.
//!
//! - `ticket`: FIFO line fixing the order of resource operations
//! - `manager`: phase state machine
//!   (Unloaded → Loading → Ready ⇄ Answering → Releasing → Unloaded)

pub mod manager;
pub mod ticket;

pub use manager::{Conversation, ResourceManager, ResourcePhase};
pub use ticket::{Ticket, TicketLine};
