//! Double-sided two-way ranging responder for the DW1000 UWB transceiver
//!
//! The [`Responder`] waits for a poll from an initiator, answers it at a
//! precisely scheduled time, receives the initiator's final message and
//! computes the distance between both devices from the six timestamps of the
//! exchange. The result is sent back to the initiator.
//!
//! The responder talks to the radio through the [`Transceiver`] trait. This
//! crate implements it for the DW1000 in the [high-level interface], which in
//! turn is built on the [register-level interface].
//!
//! This driver is built on top of [`embedded-hal`], which means it is portable
//! and can be used on any platform that implements the `embedded-hal` API.
//!
//! [high-level interface]: hl/index.html
//! [register-level interface]: ll/index.html
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod configs;
pub mod error;
pub mod frame;
pub mod hl;
pub mod ll;
pub mod responder;
pub mod time;
pub mod transceiver;
pub mod twr;

/// Redirection of nb::block
pub mod block {
    pub use nb::block;
}

pub use crate::{
    block::block,
    configs::{Config, ConfigError},
    error::Error,
    hl::{Ready, Uninitialized, DW1000},
    responder::{Cycle, Measurement, Responder, State},
    transceiver::{RxMode, Status, Transceiver, TxMode, TxStart},
};
