/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a [chain resolver](crate::chain_resolver::ChainResolver), as specified by the
//! operator.
//!
//! ## Example
//!
//! ```no_run
//! use chainstate_rs::config::Configuration;
//! use chainstate_rs::types::data_types::ChainID;
//!
//! let configuration = Configuration::builder()
//!     .data_dir("/var/lib/chainstate".into())
//!     .chain_id(ChainID::new(1))
//!     .max_backing_size(8 * 1024 * 1024 * 1024)
//!     .fork_set_max_size(1024)
//!     .reindex_progress_interval(10_000)
//!     .block_log_compression(true)
//!     .log_events(true)
//!     .build();
//! ```

use std::path::PathBuf;

use typed_builder::TypedBuilder;

use crate::types::data_types::ChainID;

/// Name of the subdirectory of [`Configuration::data_dir`] that holds the versioned store.
pub const STATE_DIR: &str = "state";

/// Name of the subdirectory of [`Configuration::data_dir`] that holds the block log.
pub const BLOCKS_DIR: &str = "blocks";

/// Stores the parameters of the chain resolver and the storage it opens.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.data_dir(...)`
    - `.chain_id(...)`
    - `.max_backing_size(...)`
    - `.log_events(...)`

    Optional:
    - `.fork_set_max_size(...)`
    - `.reindex_progress_interval(...)`
    - `.block_log_compression(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the directory under which the versioned store and the block log keep their files. Required."))]
    pub data_dir: PathBuf,
    #[builder(setter(doc = "Set the chain ID of the blockchain. Persisted state written for another chain is refused. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the maximum size (in bytes) that the versioned store's backing file may grow to. Required."))]
    pub max_backing_size: u64,
    #[builder(default = 1024, setter(doc = "Set how many heights below the head a losing branch of the fork set may fall before it is pruned. Defaults to 1024."))]
    pub fork_set_max_size: u64,
    #[builder(default = 10_000, setter(doc = "Set how many blocks are replayed between reindex progress reports. Defaults to 10,000."))]
    pub reindex_progress_interval: u64,
    #[builder(default = false, setter(doc = "Compress block log entries with LZ4? Defaults to false."))]
    pub block_log_compression: bool,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Get the directory that holds the versioned store's files.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join(STATE_DIR)
    }

    /// Get the directory that holds the block log's files.
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join(BLOCKS_DIR)
    }
}
