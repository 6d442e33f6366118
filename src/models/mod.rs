pub mod data_source;
pub mod dataset;
pub mod metadata;
pub mod profile;
pub mod query;

pub use data_source::*;
pub use dataset::*;
pub use metadata::*;
pub use profile::*;
pub use query::*;
