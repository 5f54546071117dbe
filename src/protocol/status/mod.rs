pub mod bus;
pub mod clock;

pub use bus::{BusHealth, BusStatus, StatusReport, TxStatus, BUS_TIMEOUT, POLL_TIMEOUT};
pub use clock::{Clock, ManualClock, MonotonicClock};
