pub mod engine;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod portfolio;
