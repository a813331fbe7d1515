pub mod error;
pub mod logging;
pub mod manager;
pub mod proxy;
pub mod relay;
pub mod socket;
pub mod transport;
pub mod tunnel;
pub mod waitconn;

pub use error::{SshCoreError, SshResult};
pub use logging::{Verbosity, init_logging};
pub use manager::{PendingLease, SessionLease, SessionManager, SessionPhase, SessionStatus};
pub use proxy::ProxyServer;
pub use relay::{RelayOutcome, relay};
pub use socket::{bind_listener, dial_tcp, within};
pub use transport::{ForwardStream, ForwardStreamIo, SessionConnector, TunnelSession};
pub use tunnel::TunnelServer;
pub use waitconn::wait_for_socket;
