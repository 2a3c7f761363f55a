pub mod connection_session;
pub mod protocol;
pub mod socket_network;

pub use connection_session::handle_connection;
