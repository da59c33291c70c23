pub mod booking;
pub mod lifecycle;
pub mod notify;
pub mod reclaimer;

pub use booking::AppointmentBookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use notify::NotificationService;
pub use reclaimer::UnpaidReclaimerService;
