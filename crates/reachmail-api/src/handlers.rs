//! Request handlers

pub mod campaigns;
pub mod dispatches;
pub mod status;
