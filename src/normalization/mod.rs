pub mod region;
pub mod store;

pub use store::{GeoUnit, Normalizer};
