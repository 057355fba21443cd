//! The inbound request pipeline: dedup → HITL pre-check → commands →
//! context assembly → classification → generation → guardrails → delivery.

pub mod builder;
pub mod curate;
pub mod dispatch;
pub mod slash;
pub mod summarize;

pub use dispatch::{handle_inbound, InboundMessage};
