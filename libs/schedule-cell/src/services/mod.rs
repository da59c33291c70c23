pub mod doctor_schedule;
pub mod ledger;
pub mod schedule;

pub use doctor_schedule::DoctorScheduleService;
pub use ledger::SlotLedgerService;
pub use schedule::ScheduleService;
