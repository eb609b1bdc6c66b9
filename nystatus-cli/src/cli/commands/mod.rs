pub mod check;
pub mod error;
pub mod instance;
pub mod product;
pub mod release;
