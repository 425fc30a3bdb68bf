#![allow(missing_docs)]

pub mod binding;
pub mod buffer;
pub mod config;
pub mod decode;
pub mod error;
pub mod facade;
pub mod guid;
pub mod layout;
pub mod names;
pub mod native;
pub mod negotiate;
pub mod resolve;
pub mod telemetry;

pub use config::SysqConfig;
pub use error::{BindingError, ErrorCode, QueryError};
pub use negotiate::{Negotiator, QueryOutcome};
