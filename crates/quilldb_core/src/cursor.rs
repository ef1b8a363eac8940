//! Chainable query cursor.

use crate::datastore::Datastore;
use crate::error::DbResult;
use quilldb_codec::Value;
use std::sync::Arc;

/// An opaque predicate over a document, attached with
/// [`Cursor::where_pred`]. This is the programmatic form of `$where`.
pub type WherePred = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Everything a query execution needs, moved onto the executor.
pub(crate) struct QueryPlan {
    pub query: Value,
    pub sort: Option<Vec<(String, i64)>>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub projection: Option<Value>,
    pub where_pred: Option<WherePred>,
}

/// A chainable query: `db.find(query).sort(..).skip(n).limit(n).exec()`.
///
/// `limit` and `skip` apply after the sort when one is set; without a sort
/// they bound the candidate traversal itself. Sorting is stable, so ties
/// keep their candidate-scan order.
pub struct Cursor<'ds> {
    datastore: &'ds Datastore,
    plan: QueryPlan,
}

impl<'ds> Cursor<'ds> {
    pub(crate) fn new(datastore: &'ds Datastore, query: Value) -> Self {
        Self {
            datastore,
            plan: QueryPlan {
                query,
                sort: None,
                skip: None,
                limit: None,
                projection: None,
                where_pred: None,
            },
        }
    }

    /// Sorts results by the given paths; `1` ascending, `-1` descending.
    /// Multiple entries compare lexicographically in the order given.
    #[must_use]
    pub fn sort(mut self, spec: &[(&str, i64)]) -> Self {
        self.plan.sort = Some(
            spec.iter()
                .map(|(path, direction)| (path.to_string(), *direction))
                .collect(),
        );
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.plan.skip = Some(n);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.plan.limit = Some(n);
        self
    }

    /// Reshapes each result with a projection spec.
    #[must_use]
    pub fn projection(mut self, spec: Value) -> Self {
        self.plan.projection = Some(spec);
        self
    }

    /// Adds an opaque predicate ANDed with the query.
    #[must_use]
    pub fn where_pred<F>(mut self, pred: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.plan.where_pred = Some(Arc::new(pred));
        self
    }

    /// Runs the query and returns deep copies of the matching documents.
    ///
    /// # Errors
    ///
    /// Propagates matcher, projection and I/O errors.
    pub fn exec(self) -> DbResult<Vec<Value>> {
        self.datastore.run_plan(self.plan)
    }
}
