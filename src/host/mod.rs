//! Host-facing contract and the stdio bridge for embedding the widget.

pub mod contract;
pub mod router;
pub mod stdio;
