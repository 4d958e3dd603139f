pub mod driver;
pub mod profile;
