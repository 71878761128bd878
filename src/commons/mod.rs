//! Common types used by the various cmpd components.
pub mod api;
pub mod crypto;
pub mod error;

//------------ Response Aliases ----------------------------------------------

pub type CmpdResult<T> = std::result::Result<T, self::error::Error>;
pub type CmpdEmptyResult = std::result::Result<(), self::error::Error>;
