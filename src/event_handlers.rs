/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registry of event handlers, and the method that dispatches [events](crate::events) to them.

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_fork_block_handlers: Vec<HandlerPtr<InsertForkBlockEvent>>,
    pub(crate) prune_fork_block_handlers: Vec<HandlerPtr<PruneForkBlockEvent>>,
    pub(crate) switch_fork_handlers: Vec<HandlerPtr<SwitchForkEvent>>,
    pub(crate) append_block_handlers: Vec<HandlerPtr<AppendBlockEvent>>,
    pub(crate) migrate_irreversible_handlers: Vec<HandlerPtr<MigrateIrreversibleEvent>>,
    pub(crate) pre_reindex_handlers: Vec<HandlerPtr<PreReindexEvent>>,
    pub(crate) reindex_progress_handlers: Vec<HandlerPtr<ReindexProgressEvent>>,
    pub(crate) post_reindex_handlers: Vec<HandlerPtr<PostReindexEvent>>,
    pub(crate) undo_session_handlers: Vec<HandlerPtr<UndoSessionEvent>>,
}

impl EventHandlers {
    /// Register the default logging handler of every event type.
    pub(crate) fn add_loggers(&mut self) {
        self.insert_fork_block_handlers.push(InsertForkBlockEvent::get_logger());
        self.prune_fork_block_handlers.push(PruneForkBlockEvent::get_logger());
        self.switch_fork_handlers.push(SwitchForkEvent::get_logger());
        self.append_block_handlers.push(AppendBlockEvent::get_logger());
        self.migrate_irreversible_handlers.push(MigrateIrreversibleEvent::get_logger());
        self.pre_reindex_handlers.push(PreReindexEvent::get_logger());
        self.reindex_progress_handlers.push(ReindexProgressEvent::get_logger());
        self.post_reindex_handlers.push(PostReindexEvent::get_logger());
        self.undo_session_handlers.push(UndoSessionEvent::get_logger());
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertForkBlock(insert_fork_block_event) => self
                .insert_fork_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_fork_block_event)),

            Event::PruneForkBlock(prune_fork_block_event) => self
                .prune_fork_block_handlers
                .iter()
                .for_each(|handler| handler(&prune_fork_block_event)),

            Event::SwitchFork(switch_fork_event) => self
                .switch_fork_handlers
                .iter()
                .for_each(|handler| handler(&switch_fork_event)),

            Event::AppendBlock(append_block_event) => self
                .append_block_handlers
                .iter()
                .for_each(|handler| handler(&append_block_event)),

            Event::MigrateIrreversible(migrate_irreversible_event) => self
                .migrate_irreversible_handlers
                .iter()
                .for_each(|handler| handler(&migrate_irreversible_event)),

            Event::PreReindex(pre_reindex_event) => self
                .pre_reindex_handlers
                .iter()
                .for_each(|handler| handler(&pre_reindex_event)),

            Event::ReindexProgress(reindex_progress_event) => self
                .reindex_progress_handlers
                .iter()
                .for_each(|handler| handler(&reindex_progress_event)),

            Event::PostReindex(post_reindex_event) => self
                .post_reindex_handlers
                .iter()
                .for_each(|handler| handler(&post_reindex_event)),

            Event::UndoSession(undo_session_event) => self
                .undo_session_handlers
                .iter()
                .for_each(|handler| handler(&undo_session_event)),
        }
    }
}
