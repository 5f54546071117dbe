//! EMS bus wire protocol: checksums, headers, telegram types, the device tables and the
//! outgoing request queue.

pub mod codec;
pub mod crc;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod header;
pub mod queue;
pub mod registry;
pub mod telegram;
pub mod types;

pub use codec::{EmsCodec, FrameCodec, IrtCodec, ProtocolVariant};
pub use dispatch::{DispatchOutcome, Dispatcher, Scope};
pub use error::{FrameError, TxError};
pub use queue::{TxAction, TxQueue, TxRequest, Validation};
pub use registry::{ActiveDevice, DeviceRegistry, RegistrySnapshot, VersionMatch};
pub use telegram::Telegram;
