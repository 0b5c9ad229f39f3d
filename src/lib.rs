pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod infra;
pub mod logging;
pub mod protocol;
pub mod security; // 限流、积分与封禁
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use dispatcher::{
    BroadcastReport, DispatchEvent, Dispatcher, DispatcherConfig, DispatcherHandle, EventSender,
    RunStats,
};
pub use error::{Result, ServerError};
pub use protocol::Notice;
pub use server::ChatServer;
pub use session::{ClientRecord, ClientRegistry};
pub use transport::{ClientId, Connection, ConnectionId, MockConnection, TcpConnection};
