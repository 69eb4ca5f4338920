//! Background tasks tied to one live connection.

pub(crate) mod push;
pub(crate) mod watchdog;
