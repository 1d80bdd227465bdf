pub mod config;
pub mod errors;
pub mod image_processor;
pub mod imageops_ai;
pub mod model;
pub mod server;
pub mod traits;
pub mod upload;

pub mod mocks;

pub use config::{Config, Limits};
pub use errors::{RembgError, Result};
pub use image_processor::EncodedPng;
pub use model::Model;
pub use server::{create_app, AppState};
pub use traits::*;
