pub mod inspect;
pub mod list;
pub mod serve;
pub mod transfer;
