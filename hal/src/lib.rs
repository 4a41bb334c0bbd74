//! Register, telegram and hardware-boundary modelling for the Sercos III
//! master.
//!
//! This crate owns everything that is fixed by the Sercos wire format or by
//! the IP-core register contract: IDN addressing (`idn`), the bit layout of
//! the cyclically exchanged control/status words (`words`), the telegram
//! shape and HP side-channel (`telegram`), and the trait boundary the master
//! crate drives to reach the actual IP-core (`bus`). No protocol logic lives
//! here — that is the `sercos-master` crate's job.

#![cfg_attr(not(any(test, feature = "simulation")), no_std)]

pub mod attribute;
pub mod bus;
pub mod error;
pub mod idn;
pub mod telegram;
pub mod words;

#[cfg(feature = "simulation")]
pub mod sim;
