//! Straylight: per-tenant security ranges and pod security policy admission.
//!
//! Every namespace is given a unique block of UIDs and a multi-category
//! security label, recorded as namespace annotations by the allocation
//! [`controller`]. The [`policy`] engine matches pods against security
//! policies, filling policy values from those annotations, and
//! [`admission`] picks the most restrictive policy a pod satisfies.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod mcs;
pub mod uid;

pub mod allocator;
pub mod store;

pub mod controller;

pub mod admission;
pub mod policy;
