//! Core of an anonymous electronic voting service.
//!
//! Two subsystems do the hard work: an RSA blind-signature credential
//! engine ([`crypto`], [`keystore`], [`registry`]) that issues one
//! unlinkable token per eligible voter, and a proof-of-work-sealed ballot
//! ledger ([`ledger`]) that records votes without learning who cast them.
//! HTTP transport, frontend pages, and CLI bootstrap live outside this
//! crate; [`main`](../bin/anonvote) only wires the pieces together.

pub mod config;
pub mod crypto;
pub mod keystore;
pub mod ledger;
pub mod logging;
pub mod registry;
