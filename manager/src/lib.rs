// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Library interface to the router manager, the control plane for
//! redundant virtual router appliances

// Clippy's style lints are useful, but not worth running automatically.
#![allow(clippy::style)]

pub mod alert;
pub mod app;
pub mod config;
pub mod context;
pub mod datastore;
pub mod interfaces;
mod server;
pub mod sim; // Public for testing

pub use app::RouterManager;
pub use config::Config;
pub use server::SimServer;

#[macro_use]
extern crate slog;
