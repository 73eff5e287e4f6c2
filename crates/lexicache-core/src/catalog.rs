//! Catalog size provider.
//!
//! The number of exercises per category comes from outside the progress
//! data and is refreshed independently of it.

use std::sync::{PoisonError, RwLock};

use crate::models::CategoryTotals;

pub trait CatalogProvider: Send + Sync {
    fn totals(&self) -> CategoryTotals;
}

/// In-memory catalog sizes that can be replaced whenever the catalog changes.
#[derive(Debug, Default)]
pub struct SharedCatalog {
    totals: RwLock<CategoryTotals>,
}

impl SharedCatalog {
    pub fn new(totals: CategoryTotals) -> Self {
        Self {
            totals: RwLock::new(totals),
        }
    }

    pub fn set(&self, totals: CategoryTotals) {
        *self.totals.write().unwrap_or_else(PoisonError::into_inner) = totals;
    }
}

impl CatalogProvider for SharedCatalog {
    fn totals(&self) -> CategoryTotals {
        *self.totals.read().unwrap_or_else(PoisonError::into_inner)
    }
}
