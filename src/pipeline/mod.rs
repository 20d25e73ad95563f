pub mod encoder;
pub mod gallery;
pub mod matcher;
pub mod reconcile;
