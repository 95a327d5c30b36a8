use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::workflows::enrollment::domain::{ProgramId, SelectionId, UserId};

/// One program the user picked, with its 1-based preference rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPick {
    pub program_id: ProgramId,
    pub rank: u32,
}

pub type SelectionItem = SelectionPick;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("select at least one program")]
    Empty,
    #[error("program {0} was selected more than once")]
    DuplicateProgram(ProgramId),
    #[error("rank {0} is invalid; ranks start at 1 and may not repeat")]
    InvalidRank(u32),
}

/// Short-lived ranked request for several programs, owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub id: SelectionId,
    pub user_id: UserId,
    pub items: Vec<SelectionItem>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Selection {
    pub fn new(
        user_id: UserId,
        picks: Vec<SelectionPick>,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, SelectionError> {
        if picks.is_empty() {
            return Err(SelectionError::Empty);
        }

        let mut programs = HashSet::with_capacity(picks.len());
        let mut ranks = HashSet::with_capacity(picks.len());
        for pick in &picks {
            if !programs.insert(pick.program_id) {
                return Err(SelectionError::DuplicateProgram(pick.program_id));
            }
            if pick.rank == 0 || !ranks.insert(pick.rank) {
                return Err(SelectionError::InvalidRank(pick.rank));
            }
        }

        let mut items = picks;
        items.sort_by_key(|item| item.rank);

        Ok(Self {
            id: SelectionId::new(),
            user_id,
            items,
            created_at,
            expires_at: created_at + ttl,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn program_ids(&self) -> impl Iterator<Item = ProgramId> + '_ {
        self.items.iter().map(|item| item.program_id)
    }
}

/// Selections between the select and confirm requests. Expired entries are dropped on write.
#[derive(Debug, Default)]
pub struct SelectionCache {
    entries: DashMap<SelectionId, Selection>,
}

impl SelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, selection: Selection, now: DateTime<Utc>) {
        self.purge_expired(now);
        self.entries.insert(selection.id, selection);
    }

    pub fn get(&self, id: &SelectionId) -> Option<Selection> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &SelectionId) -> Option<Selection> {
        self.entries.remove(id).map(|(_, selection)| selection)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, selection| !selection.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
