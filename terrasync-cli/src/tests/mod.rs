//! Shared test harness modules for the terrasync CLI.

use super::*;

mod helpers;
mod unit;
