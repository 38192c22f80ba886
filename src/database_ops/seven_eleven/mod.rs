pub mod provider;

pub use provider::SevenElevenFetcher;
