pub mod aggregator;
pub mod cli;
pub mod error;
pub mod gcov;
pub mod merge;
pub mod model;
pub mod report;
pub mod session;
pub mod upload;
