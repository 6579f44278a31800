/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain state storage for blockchain nodes: a versioned, multi-indexed record store with nested undo
//! sessions, and a two-tier block store that reconciles reversible blocks held in memory with
//! irreversible blocks held in an append-only log on disk.
//!
//! ## Components
//!
//! From the leaves up:
//! - [Record index](record_index): a typed collection of records with one primary ordering (by id)
//!   and any number of unique or non-unique secondary orderings.
//! - [Versioned store](versioned_store): a set of record indices, with nested undo sessions that
//!   revert every index at once, and an optional persistent backing file.
//! - [Block log](block_log): the append-only, durable sequence of irreversible blocks.
//! - [Fork set](fork_set): the in-memory tree of reversible blocks, rooted at the last irreversible
//!   block.
//! - [Chain resolver](chain_resolver): composes the above to accept blocks, look them up in either
//!   tier, migrate them into the block log when they become irreversible, replay the block log into
//!   the versioned store, and answer peers' sync queries.
//!
//! ## Configuration, events, and logging
//!
//! A chain resolver is opened from a [`ChainResolverSpec`](chain_resolver::ChainResolverSpec), which
//! takes a [`Configuration`](config::Configuration) and optional handlers for the [events](events)
//! the resolver emits. If logging is enabled, every event is also printed through the
//! [log](https://docs.rs/log/latest/log/) crate, in the format defined in [`logging`].

pub mod types;

pub mod record_index;

pub mod versioned_store;

pub mod block_log;

pub mod fork_set;

pub mod chain_resolver;

pub mod config;

pub mod events;

pub mod logging;

pub(crate) mod event_handlers;
