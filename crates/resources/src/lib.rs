//! Resource ledger.
//!
//! Bookkeeping of finite physical resources (machines, inputs, crews) and the
//! reservations tasks hold against them. Pure domain logic: no IO, no storage.

pub mod ledger;
pub mod reservation;

pub use ledger::{
    LedgerBatch, NewResource, ReservationRequest, ResourceCondition, ResourceRecord,
    ResourceSnapshot, ResourceStatus,
};
pub use reservation::TaskResourceReservation;
