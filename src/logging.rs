/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the resolver's
//! [config](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [AppendBlock](crate::events::AppendBlockEvent) is printed:
//!
//! ```text
//! AppendBlock, 1701329264, fNGCJyk, 42
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the hash of the appended
//!   block.
//! - The fourth value is the height of the appended block.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_FORK_BLOCK: &str = "InsertForkBlock";
pub const PRUNE_FORK_BLOCK: &str = "PruneForkBlock";
pub const SWITCH_FORK: &str = "SwitchFork";

pub const APPEND_BLOCK: &str = "AppendBlock";
pub const MIGRATE_IRREVERSIBLE: &str = "MigrateIrreversible";

pub const PRE_REINDEX: &str = "PreReindex";
pub const REINDEX_PROGRESS: &str = "ReindexProgress";
pub const POST_REINDEX: &str = "PostReindex";

pub const UNDO_SESSION: &str = "UndoSession";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync>;
}

impl Logger for InsertForkBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |insert_fork_block_event: &InsertForkBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INSERT_FORK_BLOCK,
                secs_since_unix_epoch(insert_fork_block_event.timestamp),
                first_seven_base64_chars(&insert_fork_block_event.block.bytes()),
                insert_fork_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneForkBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |prune_fork_block_event: &PruneForkBlockEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_FORK_BLOCK,
                secs_since_unix_epoch(prune_fork_block_event.timestamp),
                first_seven_base64_chars(&prune_fork_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SwitchForkEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |switch_fork_event: &SwitchForkEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SWITCH_FORK,
                secs_since_unix_epoch(switch_fork_event.timestamp),
                first_seven_base64_chars(&switch_fork_event.old_head.bytes()),
                first_seven_base64_chars(&switch_fork_event.new_head.bytes()),
                switch_fork_event.popped,
                switch_fork_event.applied
            )
        };
        Box::new(logger)
    }
}

impl Logger for AppendBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |append_block_event: &AppendBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                APPEND_BLOCK,
                secs_since_unix_epoch(append_block_event.timestamp),
                first_seven_base64_chars(&append_block_event.block.bytes()),
                append_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for MigrateIrreversibleEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |migrate_irreversible_event: &MigrateIrreversibleEvent| {
            log::info!(
                "{}, {}, {}, {}",
                MIGRATE_IRREVERSIBLE,
                secs_since_unix_epoch(migrate_irreversible_event.timestamp),
                migrate_irreversible_event.old_last_irreversible,
                migrate_irreversible_event.new_last_irreversible
            )
        };
        Box::new(logger)
    }
}

impl Logger for PreReindexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |pre_reindex_event: &PreReindexEvent| {
            log::info!(
                "{}, {}, {}",
                PRE_REINDEX,
                secs_since_unix_epoch(pre_reindex_event.timestamp),
                reindex_notification_info(&pre_reindex_event.notification)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReindexProgressEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |reindex_progress_event: &ReindexProgressEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REINDEX_PROGRESS,
                secs_since_unix_epoch(reindex_progress_event.timestamp),
                reindex_progress_event.height,
                reindex_progress_event.target
            )
        };
        Box::new(logger)
    }
}

impl Logger for PostReindexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |post_reindex_event: &PostReindexEvent| {
            log::info!(
                "{}, {}, {}, {}",
                POST_REINDEX,
                secs_since_unix_epoch(post_reindex_event.timestamp),
                reindex_notification_info(&post_reindex_event.notification),
                post_reindex_event.elapsed.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for UndoSessionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |undo_session_event: &UndoSessionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UNDO_SESSION,
                secs_since_unix_epoch(undo_session_event.timestamp),
                first_seven_base64_chars(&undo_session_event.block.bytes()),
                undo_session_event.revision
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn reindex_notification_info(notification: &ReindexNotification) -> String {
    format!(
        "max block number: {}, force replay: {}, validate: {}, last block number: {}, success: {}",
        notification
            .max_block_number
            .map(|height| height.to_string())
            .unwrap_or_else(|| String::from("none")),
        notification.force_replay,
        notification.validate_during_replay,
        notification.last_block_number,
        notification.reindex_success
    )
}
