pub mod booking;
pub mod clock;
pub mod connection;
pub mod constants;
pub mod error;
pub mod status;
pub mod types;

pub use booking::{AvailabilityBlock, BlockKind, Booking};
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::ChannelConnection;
pub use error::PmsError;
pub use status::BookingStatus;
pub use types::*;
