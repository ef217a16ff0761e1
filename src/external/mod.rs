pub mod agworld;
pub mod data_source;
