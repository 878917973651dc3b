#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! USSD payment gateway over the Open Payments transfer pipeline.
//!
//! Exposes a turn-based USSD menu as an HTTP endpoint: navigating to the
//! confirm leaf executes one payment pipeline run, and the outcome is
//! rendered synchronously as a `CON`/`END` reply. A successful payment also
//! fires an SMS notification to the initiating subscriber; delivery is
//! fire-and-forget, failures are logged and never reach the caller.

pub mod config;
pub mod handlers;
pub mod menu;
pub mod notify;
