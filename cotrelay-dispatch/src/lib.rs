pub mod dispatcher;
pub mod source;
pub mod transport;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use transport::{MockTakTransport, TakTransport, TcpTakTransport};
