#![no_std]
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )
)]

#[cfg(test)]
extern crate std;

// Timing and control logic for the exhaust cam phasing controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Edge timestamps go in, solenoid duty cycles come out;
// everything in between is owned by a single `Controller` value.

pub mod capture;
pub mod config;
pub mod console;
pub mod controller;
pub mod curve;
pub mod diagnostics;
pub mod fault;
pub mod feedback;
pub mod filter;
pub mod gain;
pub mod supervisor;
pub mod telemetry;
pub mod timing;
