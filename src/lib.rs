#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod address;
pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod paths;
pub mod progress;
pub mod ssh;
pub mod system;
pub mod trust;
pub mod ui;
pub mod vm_state;

#[cfg(test)]
pub(crate) mod fakes;
