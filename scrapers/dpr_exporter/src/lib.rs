pub mod clean_report;
pub mod club_detail;
pub mod config;
pub mod coords;
pub mod fiscal;
pub mod requester;
pub mod runner;
pub mod types;
pub mod upsert;
