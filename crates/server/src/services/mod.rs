pub mod access;
pub mod calendar;
pub mod export;
pub mod invites;
pub mod stats;
