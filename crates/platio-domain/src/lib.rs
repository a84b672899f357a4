//! Platform domain model.
//!
//! This crate has **no dependencies** and **no hardware access**. It is the
//! vocabulary shared by the driver and its backends: which hardware scopes
//! exist, how they contain each other, how samples are combined and printed,
//! and which integer codes a backend may fail with.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`domain`] | `DomainType`, `DomainRef`, containment rules |
//! | [`signal`] | `RequestKind`, `Aggregation`, `Format`, `Behavior` |
//! | [`codes`] | Backend error codes and their default messages |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codes;
pub mod domain;
pub mod signal;

pub use domain::{is_nested, DomainRef, DomainType, UnknownDomain, NUM_DOMAIN};
pub use signal::{Aggregation, Behavior, Format, RequestKind};
