pub mod broadcaster;
pub mod error;
pub mod peers;
pub mod subscriber;
pub mod wire;

pub use broadcaster::Broadcaster;
pub use error::GossipError;
pub use peers::PeerBook;
pub use subscriber::Subscriber;
pub use wire::Announcement;
