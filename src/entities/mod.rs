pub mod order;
pub mod payment;
pub mod payment_slip;
pub mod user;
