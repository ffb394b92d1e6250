//! Test support for `OrderCore` backends: reusable contract suites and a
//! fault-injecting wrapper for every port.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod chaos;
pub mod contract;

pub use chaos::{Chaos, ChaosConfig, ChaosExt, Probability};
pub use contract::{ContractTestFailure, ContractTestResult};
