pub mod error;
pub mod host;
pub mod ota;
pub mod poller;
pub mod session;
pub mod stores;
pub mod transport;

pub use error::{SessionError, TransportError};
pub use ota::OtaController;
pub use poller::StatusPoller;
pub use session::Session;
pub use stores::{AutoStore, ManualStore, SlotStore};
pub use transport::{DeviceApi, HttpDevice, StatusSource};
