//! Ksyun Core
//!
//! Declarative-to-imperative mapping and call orchestration engine shared by
//! every Kingsoft Cloud resource adapter

pub mod call;
pub mod case_convert;
pub mod mapping;
pub mod process;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod unmarshal;
