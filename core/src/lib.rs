pub mod clock;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reset;
pub mod storage;
pub mod sync;
