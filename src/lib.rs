pub mod socket;
mod addr;
mod client;
mod error;
mod packet;
mod selector;
mod server;

pub use self::addr::IpAddress;
pub use self::client::TcpClient;
pub use self::error::{SocketError, errno};
pub use self::packet::Packet;
pub use self::selector::{Registration, Selectable, SocketSelector};
pub use self::server::{ClientId, TcpServer};
pub use self::socket::{ANY_PORT, Status, TcpListener, TcpSocket, UdpSocket};
