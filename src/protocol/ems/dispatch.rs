/// Routing of decoded telegrams to registered handlers.
use std::{collections::HashMap, sync::Arc};

use strum::Display;

use super::{registry::DeviceRegistry, telegram::Telegram};
use crate::api::ems::traits::TelegramHandler;

/// Which senders a handler listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Scope {
    /// Any sender.
    Common,
    /// Only the active boiler or the active thermostat.
    ModelSpecific,
}

/// What a dispatch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    /// At least one handler reported a change of tracked state.
    pub changed: bool,
}

impl DispatchOutcome {
    pub fn is_unhandled(&self) -> bool {
        self.invoked == 0
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<(Scope, u16), Vec<Arc<dyn TelegramHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(
        &mut self,
        scope: Scope,
        type_id: u16,
        handler: Arc<dyn TelegramHandler>,
    ) {
        self.handlers
            .entry((scope, type_id))
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Run every handler registered for the telegram's type.
    ///
    /// Telegrams with a non-zero offset carry a fragment of a type and are not handed out.
    /// Types nobody registered for are ignored.
    pub fn dispatch(&self, telegram: &Telegram, registry: &DeviceRegistry) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if telegram.offset != 0 {
            log::debug!(
                "Skipping type 0x{:02X} at offset {}",
                telegram.type_id,
                telegram.offset
            );
            return outcome;
        }

        let common = self.handlers.get(&(Scope::Common, telegram.type_id));
        let specific = registry
            .is_active(telegram.src)
            .then(|| self.handlers.get(&(Scope::ModelSpecific, telegram.type_id)))
            .flatten();

        for handler in common.into_iter().chain(specific).flatten() {
            outcome.invoked += 1;
            outcome.changed |= handler.handle(
                telegram.src,
                telegram.dest,
                telegram.type_id,
                telegram.offset,
                &telegram.data,
            );
        }

        if outcome.is_unhandled() {
            log::trace!(
                "No handler for type 0x{:02X} from 0x{:02X}",
                telegram.type_id,
                telegram.src
            );
        }
        outcome
    }
}
