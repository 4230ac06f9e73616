use std::ops::{Deref, DerefMut};

use log::warn;

use crate::engine::Engine;
use crate::vector::layer::{engine_msg, VectorLayer};

/// Represents an in-flight transaction on the data source of a layer.
///
/// It can either be committed by calling [`commit`](Transaction::commit) or rolled back by calling
/// [`rollback`](Transaction::rollback).
///
/// If the transaction is not explicitly committed when it is dropped, it is implicitly rolled
/// back.
///
/// The transaction holds a mutable borrow on the `VectorLayer` that it was created from, so
/// during the lifetime of the transaction you access the layer by dereferencing the
/// `Transaction`.
pub struct Transaction<'a, E: Engine> {
    layer: &'a mut VectorLayer<E>,
    rollback_on_drop: bool,
}

impl<'a, E: Engine> Transaction<'a, E> {
    fn new(layer: &'a mut VectorLayer<E>) -> Self {
        Transaction {
            layer,
            rollback_on_drop: true,
        }
    }

    /// Commits this transaction. Returns `false` when the engine refused.
    ///
    /// Depending on drivers, this may or may not abort layer sequential readings that are active.
    pub fn commit(mut self) -> bool {
        self.rollback_on_drop = false;
        self.layer.commit_transaction()
    }

    /// Rolls back the data source to its state before the start of this transaction.
    pub fn rollback(mut self) -> bool {
        self.rollback_on_drop = false;
        self.layer.rollback_transaction()
    }
}

impl<E: Engine> Deref for Transaction<'_, E> {
    type Target = VectorLayer<E>;

    fn deref(&self) -> &Self::Target {
        self.layer
    }
}

impl<E: Engine> DerefMut for Transaction<'_, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.layer
    }
}

impl<E: Engine> Drop for Transaction<'_, E> {
    fn drop(&mut self) {
        if self.rollback_on_drop {
            self.layer.rollback_transaction();
        }
    }
}

impl<E: Engine> VectorLayer<E> {
    /// Starts a transaction on the data source.
    ///
    /// Without `force` the data source must support transactions natively; with
    /// `force`, emulated transactions are accepted too. Returns `false` (and logs why)
    /// when no transaction could be started.
    pub fn start_transaction(&mut self, force: bool) -> bool {
        let quiet = self.config.quiet;
        let supported = match self.state.as_ref() {
            Some(open) => {
                open.dataset.test_capability("Transactions")
                    || (force && open.dataset.test_capability("EmulatedTransactions"))
            }
            None => return false,
        };
        if !supported {
            if !quiet {
                warn!(
                    "Data source '{}' does not support transactions{}",
                    self.dsn(),
                    if force { "" } else { " natively" }
                );
            }
            return false;
        }
        let Some(open) = self.state.as_mut() else {
            return false;
        };
        match open.dataset.start_transaction(force) {
            Ok(()) => true,
            Err(e) => {
                if !quiet {
                    warn!("Unable to start transaction: {}", engine_msg(&e));
                }
                false
            }
        }
    }

    pub fn commit_transaction(&mut self) -> bool {
        self.end_transaction(true)
    }

    pub fn rollback_transaction(&mut self) -> bool {
        self.end_transaction(false)
    }

    fn end_transaction(&mut self, commit: bool) -> bool {
        let quiet = self.config.quiet;
        let Some(open) = self.state.as_mut() else {
            return false;
        };
        let result = if commit {
            open.dataset.commit_transaction()
        } else {
            open.dataset.rollback_transaction()
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                if !quiet {
                    warn!(
                        "Unable to {} transaction: {}",
                        if commit { "commit" } else { "roll back" },
                        engine_msg(&e)
                    );
                }
                false
            }
        }
    }

    /// Starts a transaction and wraps it in a guard.
    ///
    /// Because the guard implements `DerefMut`, it can be used in place of the layer to
    /// make modifications. All changes are applied when [`commit`](Transaction::commit) is
    /// called. They are canceled by calling [`rollback`](Transaction::rollback) instead, or
    /// by dropping the guard without calling `commit`.
    pub fn transaction(&mut self, force: bool) -> Option<Transaction<'_, E>> {
        if self.start_transaction(force) {
            Some(Transaction::new(self))
        } else {
            None
        }
    }
}
