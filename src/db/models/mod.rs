#![allow(unused_imports)]

//! Database models, one file per table.

pub mod kv;
pub mod session;
pub mod user;
pub mod verification;

pub use self::kv::*;
pub use self::session::*;
pub use self::user::*;
pub use self::verification::*;
