use crate::error::Result;
use crate::logger::log;

// ========== Naming ==========

/// Tag of the outbound created alongside a node
const DEFAULT_OUTBOUND_SUFFIX: &str = "_out";

/// Composite user identity, `[user](node)`
pub fn format_user_email(user: &str, node: &str) -> String {
    format!("[{}]({})", user, node)
}

/// Tag of the default outbound of a node
pub fn format_default_outbound_name(node: &str) -> String {
    format!("{}{}", node, DEFAULT_OUTBOUND_SUFFIX)
}

/// Tag of the `index`-th block rule of a node
pub fn format_block_rule_tag(node: &str, index: usize) -> String {
    format!("block-{}@{}", index, node)
}

/// Treat an empty string the same as an absent one
pub fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

// ========== Rollback ==========

type UndoAction<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Stack of compensating actions for a multi-step operation
///
/// Each completed step pushes its undo. If the guard is dropped without
/// [`Rollback::commit`], the undos run in reverse order. Undo failures are
/// logged and do not stop the remaining undos.
pub struct Rollback<'a> {
    scope: String,
    actions: Vec<(&'static str, UndoAction<'a>)>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            actions: Vec::new(),
            committed: false,
        }
    }

    /// Register the undo of a step that just succeeded
    pub fn push(&mut self, step: &'static str, undo: impl FnOnce() -> Result<()> + 'a) {
        self.actions.push((step, Box::new(undo)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Keep every step; the undos are discarded
    pub fn commit(mut self) {
        self.committed = true;
        self.actions.clear();
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.committed || self.actions.is_empty() {
            return;
        }
        let steps = self.actions.len();
        let mut failed = 0;
        while let Some((step, undo)) = self.actions.pop() {
            if let Err(e) = undo() {
                failed += 1;
                log::warn!(scope = %self.scope, step = step, error = %e, "Undo failed");
            }
        }
        log::rollback(&self.scope, steps, failed);
    }
}
