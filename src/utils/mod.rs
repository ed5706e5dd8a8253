pub mod data;
pub mod evaluation;
pub mod plot;
pub mod stats;
