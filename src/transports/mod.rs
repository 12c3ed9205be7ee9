//! Concrete transports producing raw byte pipes.

pub mod tcp;
