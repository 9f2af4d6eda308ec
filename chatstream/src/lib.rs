// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod keystore;
pub mod render;
pub mod session;
pub mod stream;
pub mod timeout;
pub mod transport;

pub use error::ChatError;
pub use session::{SendOutcome, SessionController, SessionOptions};
