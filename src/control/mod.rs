//! Control plane: the message types exchanged with the synthesis loop, the
//! UI-side surface that produces them, and the channel bridge between the
//! two threads.

pub mod bridge;
pub mod message;
pub mod surface;
