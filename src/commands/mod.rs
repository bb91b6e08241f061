pub(crate) mod completions;
pub(crate) mod connect;
pub(crate) mod download;
pub(crate) mod torrc;
