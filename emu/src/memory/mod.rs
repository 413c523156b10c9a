pub mod ram;
pub mod translate;
