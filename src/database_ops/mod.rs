pub mod db;
pub mod export;
pub mod family_mart;
pub mod fetcher;
pub mod mock;
pub mod session;
pub mod seven_eleven;
pub mod store_repository;
