pub mod engine;
pub mod fanout;
pub mod settings;
pub mod worker;

pub use engine::{CancelledBooking, ConfirmedBooking, EngineParts, HoldReceipt, ReservationEngine};
pub use fanout::RoomHub;
pub use settings::ReservationSettings;
pub use worker::{JobError, JobWorker};
