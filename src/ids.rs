//! Translation between client-minted temporary identifiers and persistent ids.
//!
//! Clients create nodes optimistically and reference them as `temp_<token>`
//! until the server answers with the stored id. The reconciler keeps that
//! association for the lifetime of the process only.

use anyhow::anyhow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{LibError, Result};

pub const TEMPORARY_ID_PREFIX: &str = "temp_";

pub fn is_temporary(id: &str) -> bool {
    id.starts_with(TEMPORARY_ID_PREFIX)
}

/// Parses an identifier that must already be persistent.
pub fn parse_persistent(id: &str) -> Result<i64> {
    if is_temporary(id) {
        return Err(LibError::malformed_id(
            "Temporary identifiers are not accepted here",
            anyhow!("expected persistent id, got temporary id {}", id),
        ));
    }
    id.trim().parse::<i64>().map_err(|err| {
        LibError::malformed_id(
            "Identifier is not a valid persistent id",
            anyhow!("invalid id format {:?}: {}", id, err),
        )
    })
}

#[derive(Debug, Default)]
pub struct IdReconciler {
    mappings: DashMap<String, i64>,
}

impl IdReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `temporary_id -> persistent_id`.
    ///
    /// Re-registering the same pair is a no-op. A live temporary id cannot be
    /// pointed at a different persistent id.
    pub fn register_mapping(&self, temporary_id: &str, persistent_id: i64) -> Result<()> {
        if !is_temporary(temporary_id) {
            return Err(LibError::malformed_id(
                "Temporary identifiers must start with temp_",
                anyhow!("cannot register non-temporary id {:?}", temporary_id),
            ));
        }

        match self.mappings.entry(temporary_id.to_string()) {
            Entry::Occupied(entry) if *entry.get() == persistent_id => Ok(()),
            Entry::Occupied(entry) => Err(LibError::conflict(
                "Temporary identifier is already mapped",
                anyhow!(
                    "{} already maps to {}, refusing {}",
                    temporary_id,
                    entry.get(),
                    persistent_id
                ),
            )),
            Entry::Vacant(entry) => {
                entry.insert(persistent_id);
                tracing::debug!(temporary_id, persistent_id, "registered id mapping");
                Ok(())
            }
        }
    }

    pub fn resolve(&self, id: &str) -> Result<i64> {
        if is_temporary(id) {
            return self.mapping(id).ok_or_else(|| {
                LibError::unknown_temporary_id(
                    "Unknown temporary identifier",
                    anyhow!("no mapping registered for {}", id),
                )
            });
        }

        id.trim().parse::<i64>().map_err(|err| {
            LibError::malformed_id(
                "Identifier is not a valid node id",
                anyhow!("invalid id format {:?}: {}", id, err),
            )
        })
    }

    pub fn mapping(&self, temporary_id: &str) -> Option<i64> {
        self.mappings.get(temporary_id).map(|entry| *entry.value())
    }

    /// Drops `temporary_id` only while it still points at `persistent_id`.
    pub fn forget(&self, temporary_id: &str, persistent_id: i64) -> bool {
        self.mappings
            .remove_if(temporary_id, |_, mapped| *mapped == persistent_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn clear(&self) {
        self.mappings.clear();
        tracing::info!("cleared id mappings");
    }
}
