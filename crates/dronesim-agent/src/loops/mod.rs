//! Background loops for continuous processing.

pub mod persist_loop;
