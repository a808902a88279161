//! Binary persistence of the classifier database.

pub mod archive;

pub use archive::{load_database, save_database};
