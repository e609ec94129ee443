pub mod identifiers;
pub mod money;
pub mod payments;
pub mod reports;
pub mod slips;
pub mod users;
