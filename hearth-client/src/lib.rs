#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Client engine for Campfire-style group chat.
//!
//! [`campfire::Campfire`] authenticates an account and hands out
//! [`room::Room`] handles. A room can post messages, manage membership,
//! and create the two background engines this crate is built around:
//! [`stream::RoomStream`], which keeps a classified message stream
//! flowing to attached listeners (live connection or transcript
//! polling), and [`upload::Upload`], which transfers a file in the
//! background with progress reporting and cancellation.
//!
//! Background failures are reported through callbacks only; `start`,
//! `stop`, and `join` on both engines follow the same lifecycle
//! contract. See the module docs for the details of each.

pub mod campfire;
pub mod config;
pub mod directory;
pub mod error;
pub mod models;
pub mod room;
pub mod stream;
pub mod transport;
pub mod upload;
