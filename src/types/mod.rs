//! Types that are used across multiple components of this crate.
//!
//! Types specific to a single component, e.g., [`Synopsis`](crate::fork_set::Synopsis), live in that
//! component's module instead.

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod skip_flags;
