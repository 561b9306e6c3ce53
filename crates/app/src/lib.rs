//! Application layer of the nursery order, allocation and dispatch core.
//!
//! - `services`: the public actions, wired against one [`NurseryStore`](nursery_infra::NurseryStore)
//! - `dto`: request/response shapes
//! - `error`: [`ActionError`], the `{ error, details? }` result every action returns
//! - `config`: environment configuration

pub mod config;
pub mod context;
pub mod dto;
pub mod error;
pub mod services;

pub use config::AppConfig;
pub use context::ActionContext;
pub use error::{ActionError, ActionErrorKind};
pub use services::{NurseryServices, build_services};
