//! HTTP implementation of [`sketchgraph_core::CadApi`] for the CAD platform's
//! REST API.

pub mod client;
pub mod responses;

pub use client::{OnshapeClient, OnshapeConfig, ACCEPT_HEADER};
