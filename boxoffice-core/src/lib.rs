pub mod booking;
pub mod clock;
pub mod error;
pub mod events;
pub mod hold;
pub mod jobs;
pub mod pricing;
pub mod repository;
pub mod seat;
pub mod services;

pub use booking::{Booking, BookingDetails, BookingSeat, BookingStatus, LockedBooking};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConflictReason, ReservationError, SeatConflict, StoreError};
pub use events::{SeatChange, SeatDelta};
pub use hold::HoldRecord;
pub use jobs::{Job, JobEnvelope, Notification, NotificationKind, RetryPolicy};
pub use seat::{SeatCategory, SeatInstance, SeatStatus, SeatView};

pub type ReservationResult<T> = Result<T, ReservationError>;
