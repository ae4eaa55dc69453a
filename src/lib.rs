//! kiosk-watchdog - inactivity watchdogs for shared Linux machines.
//!
//! Two watchdogs built on one threshold timer:
//! - [`idle::IdleWatchdog`] warns an idle user and then logs the session off.
//! - [`nologon::NoLogonWatchdog`] reboots the machine once nobody has been
//!   logged on for a while.

pub mod clock;
pub mod config;
pub mod domain;
pub mod idle;
pub mod nologon;
pub mod platform;
pub mod supervisor;
pub mod timer;

#[cfg(test)]
mod testing;
