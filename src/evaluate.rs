//! Two-stage spatial predicate evaluation.
//!
//! Stage one pushes an envelope comparison into the record store so only
//! plausible rows are fetched; stage two decodes the survivors and checks the
//! exact topological relation. `DISJOINT` inverts the pre-filter: envelope
//! disjointness already proves the relation, so those rows match without
//! decoding and only envelope-intersecting rows need the exact test.

use crate::codec::decode_geometry;
use crate::error::Result;
use crate::store::SpatialStore;
use crate::types::{Envelope, NodeMatch};
use geo::Geometry;
use geo::relate::IntersectionMatrix;
use geo::Relate;

/// Topological relation between a stored geometry and the query geometry.
///
/// The relation reads candidate-to-query: `Within` matches records whose
/// geometry lies within the query geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialOperator {
    Equals,
    Disjoint,
    Intersects,
    Touches,
    Crosses,
    Within,
    Contains,
    Overlaps,
}

impl SpatialOperator {
    /// Whether an intersection matrix computed as `candidate.relate(query)`
    /// satisfies this operator.
    pub fn matches(&self, im: &IntersectionMatrix) -> bool {
        match self {
            SpatialOperator::Equals => im.is_equal_topo(),
            SpatialOperator::Disjoint => im.is_disjoint(),
            SpatialOperator::Intersects => im.is_intersects(),
            SpatialOperator::Touches => im.is_touches(),
            SpatialOperator::Crosses => im.is_crosses(),
            SpatialOperator::Within => im.is_within(),
            SpatialOperator::Contains => im.is_contains(),
            SpatialOperator::Overlaps => im.is_overlaps(),
        }
    }
}

/// Runs operator queries against a [`SpatialStore`].
pub struct PredicateEvaluator<'a> {
    store: &'a SpatialStore,
}

impl<'a> PredicateEvaluator<'a> {
    pub fn new(store: &'a SpatialStore) -> Self {
        Self { store }
    }

    /// All indexed nodes whose geometry stands in `operator` relation to the
    /// query geometry, optionally restricted to a document scope.
    ///
    /// An absent query geometry yields no matches for any operator, including
    /// `Disjoint`.
    pub fn evaluate(
        &self,
        query: Option<&Geometry<f64>>,
        operator: SpatialOperator,
        scope: Option<&[&str]>,
    ) -> Result<Vec<NodeMatch>> {
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        let Some(query_env) = Envelope::of(query) else {
            return Ok(Vec::new());
        };

        if operator == SpatialOperator::Disjoint {
            return self.evaluate_disjoint(query, &query_env, scope);
        }

        let candidates = self.store.scan_region(Some(&query_env), scope)?;
        log::debug!(
            "{:?}: {} candidate(s) after envelope pre-filter",
            operator,
            candidates.len()
        );

        let mut matches = Vec::new();
        for record in candidates {
            let candidate = decode_geometry(&record.geometry)?;
            if operator.matches(&candidate.relate(query)) {
                matches.push(NodeMatch {
                    document_key: record.document_key,
                    node_id: record.node_id,
                });
            }
        }
        Ok(matches)
    }

    /// Envelope disjointness is sufficient for geometry disjointness, so
    /// those rows are accepted straight off the envelope columns. Only rows
    /// with intersecting envelopes are decoded for the exact check.
    fn evaluate_disjoint(
        &self,
        query: &Geometry<f64>,
        query_env: &Envelope,
        scope: Option<&[&str]>,
    ) -> Result<Vec<NodeMatch>> {
        let mut matches = Vec::new();
        for record in self.store.scan_region(None, scope)? {
            let disjoint = record.envelope.is_disjoint(query_env)
                || decode_geometry(&record.geometry)?.relate(query).is_disjoint();
            if disjoint {
                matches.push(NodeMatch {
                    document_key: record.document_key,
                    node_id: record.node_id,
                });
            }
        }
        Ok(matches)
    }
}
