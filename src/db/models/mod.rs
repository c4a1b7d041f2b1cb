pub mod account;
pub mod award;
