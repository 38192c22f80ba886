pub mod provider;

pub use provider::FamilyMartFetcher;
