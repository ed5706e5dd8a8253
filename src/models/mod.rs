pub mod autoencoder;
pub mod base_model;
pub mod checkpoint;
pub mod trainer;
