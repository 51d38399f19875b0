//! Index worker: document lifecycle orchestration over the spatial store.
//!
//! The worker owns the pipeline from parse events to persisted records. Per
//! fragment it extracts a geometry, reprojects it to the canonical SRS,
//! computes the envelope and writes one record. Fragment-level failures
//! (malformed geometry, unknown SRS, empty shape) are contained: the fragment
//! is skipped with a warning and the rest of the document still indexes.
//! Store failures are not contained and abort the operation.

use crate::error::{GeodexError, Result};
use crate::evaluate::{PredicateEvaluator, SpatialOperator};
use crate::extract::{FragmentEvent, GeometryExtractor};
use crate::store::SpatialStore;
use crate::transform::TransformCache;
use crate::types::{Envelope, IndexConfig, NodeMatch, SpatialRecord};
use crate::codec;
use geo::Geometry;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;

/// One geometry-bearing fragment of a document, as reported by the host's
/// streaming parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Identifier of the fragment's root node, unique within the document.
    pub node_id: u64,
    /// Structural parse events of the fragment, in document order.
    pub events: Vec<FragmentEvent>,
}

impl Fragment {
    pub fn new(node_id: u64, events: Vec<FragmentEvent>) -> Self {
        Self { node_id, events }
    }
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexSummary {
    /// Fragments that produced a persisted record.
    pub indexed: usize,
    /// Fragments skipped over a contained fragment-level failure.
    pub skipped: usize,
}

/// Document lifecycle hooks, as the host engine's indexing pipeline sees
/// them. [`IndexWorker`] implements this; hosts can wrap or stub it.
pub trait DocumentIndex: Send + Sync {
    /// A new document was stored; index its fragments.
    fn on_store(&self, document_key: &str, fragments: &[Fragment]) -> Result<IndexSummary>;

    /// A document changed; its records are replaced wholesale.
    fn on_update(&self, document_key: &str, fragments: &[Fragment]) -> Result<IndexSummary>;

    /// A document was removed; returns the number of records dropped.
    fn on_remove(&self, document_key: &str) -> Result<usize>;
}

/// Registry of named [`DocumentIndex`] instances, one per configured index.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: RwLock<FxHashMap<String, Arc<dyn DocumentIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under a name, replacing any previous holder of that name.
    pub fn register<S: Into<String>>(&self, name: S, index: Arc<dyn DocumentIndex>) {
        self.indexes.write().insert(name.into(), index);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DocumentIndex>> {
        self.indexes.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn DocumentIndex>> {
        self.indexes.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

/// The spatial index worker.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and the store
/// serializes its own connection handling.
///
/// # Example
///
/// ```rust
/// use geodex::{FragmentEvent, Fragment, IndexWorker, ShapeKind, SpatialOperator};
/// use geo::{Geometry, Point};
///
/// let worker = IndexWorker::memory().unwrap();
/// let fragment = Fragment::new(1, vec![
///     FragmentEvent::ShapeStart { kind: ShapeKind::Point, srs: None },
///     FragmentEvent::Coord { x: 5.0, y: 5.0 },
///     FragmentEvent::ShapeEnd,
/// ]);
/// let summary = worker.store_document("/db/doc#1", &[fragment]).unwrap();
/// assert_eq!(summary.indexed, 1);
///
/// let query = Geometry::Point(Point::new(5.0, 5.0));
/// let hits = worker
///     .search(Some(&query), "EPSG:4326", SpatialOperator::Equals, None)
///     .unwrap();
/// assert_eq!(hits.len(), 1);
/// ```
pub struct IndexWorker {
    store: Arc<SpatialStore>,
    transforms: Arc<TransformCache>,
    canonical_srs: String,
}

impl IndexWorker {
    pub fn new(
        store: Arc<SpatialStore>,
        transforms: Arc<TransformCache>,
        canonical_srs: String,
    ) -> Self {
        Self {
            store,
            transforms,
            canonical_srs,
        }
    }

    /// Worker over a private in-memory store with default configuration.
    pub fn memory() -> Result<Self> {
        let config = IndexConfig::default();
        Ok(Self::new(
            Arc::new(SpatialStore::memory(&config)?),
            Arc::new(TransformCache::with_builtin()),
            config.canonical_srs,
        ))
    }

    /// Worker over a file-backed store with default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = IndexConfig::default();
        Ok(Self::new(
            Arc::new(SpatialStore::open(path, &config)?),
            Arc::new(TransformCache::with_builtin()),
            config.canonical_srs,
        ))
    }

    pub fn store(&self) -> &SpatialStore {
        &self.store
    }

    pub fn canonical_srs(&self) -> &str {
        &self.canonical_srs
    }

    /// Index every fragment of a newly stored document.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if a record write fails. Fragment-level extraction
    /// and reprojection failures do not error; they count as skipped.
    pub fn store_document(
        &self,
        document_key: &str,
        fragments: &[Fragment],
    ) -> Result<IndexSummary> {
        let mut summary = IndexSummary::default();
        for fragment in fragments {
            match self.prepare_record(document_key, fragment) {
                Ok(record) => {
                    self.store.insert(&record)?;
                    summary.indexed += 1;
                }
                Err(reason) => {
                    log::warn!(
                        "skipping fragment {} of {}: {}",
                        fragment.node_id,
                        document_key,
                        reason
                    );
                    summary.skipped += 1;
                }
            }
        }
        log::debug!(
            "indexed {} ({} fragment(s), {} skipped)",
            document_key,
            summary.indexed,
            summary.skipped
        );
        Ok(summary)
    }

    /// Replace a document's records with the current fragment set.
    pub fn update_document(
        &self,
        document_key: &str,
        fragments: &[Fragment],
    ) -> Result<IndexSummary> {
        self.store.delete_by_document(document_key)?;
        self.store_document(document_key, fragments)
    }

    /// Drop a removed document's records. Idempotent.
    pub fn remove_document(&self, document_key: &str) -> Result<usize> {
        let removed = self.store.delete_by_document(document_key)?;
        log::debug!("removed {} record(s) for {}", removed, document_key);
        Ok(removed)
    }

    /// Operator query over the index.
    ///
    /// The query geometry is reprojected from `query_srs` to the canonical
    /// SRS before evaluation. An absent query matches nothing.
    pub fn search(
        &self,
        query: Option<&Geometry<f64>>,
        query_srs: &str,
        operator: SpatialOperator,
        scope: Option<&[&str]>,
    ) -> Result<Vec<NodeMatch>> {
        let canonical_query = match query {
            Some(geometry) => Some(self.transform_geometry(
                geometry,
                query_srs,
                &self.canonical_srs,
            )?),
            None => None,
        };
        PredicateEvaluator::new(&self.store).evaluate(
            canonical_query.as_ref(),
            operator,
            scope,
        )
    }

    /// Decode the stored canonical-SRS geometry of one indexed node, for
    /// query functions operating on stored geometry references.
    pub fn stored_geometry(
        &self,
        document_key: &str,
        node_id: u64,
    ) -> Result<Option<Geometry<f64>>> {
        match self.store.get(document_key, node_id)? {
            Some(record) => Ok(Some(codec::decode_geometry(&record.geometry)?)),
            None => Ok(None),
        }
    }

    /// Source spatial reference recorded for one indexed node. The stored
    /// geometry itself is always canonical; this reports the fragment's
    /// declared reference.
    pub fn stored_srs(&self, document_key: &str, node_id: u64) -> Result<Option<String>> {
        Ok(self
            .store
            .get(document_key, node_id)?
            .map(|record| record.srs))
    }

    /// Reproject a geometry between two spatial references through the
    /// worker's transform cache.
    pub fn transform_geometry(
        &self,
        geometry: &Geometry<f64>,
        source: &str,
        target: &str,
    ) -> Result<Geometry<f64>> {
        let transform = self.transforms.get(source, target)?;
        Ok(transform.apply(geometry))
    }

    /// Verify the index against the documents' current fragment sets.
    ///
    /// Re-runs extraction as a dry run and compares the set of indexable
    /// node ids per document with what the store holds, then checks that the
    /// store holds nothing else. Returns `false` on any discrepancy.
    pub fn check_index(&self, documents: &[(&str, &[Fragment])]) -> Result<bool> {
        let mut expected_total = 0u64;
        for (document_key, fragments) in documents {
            let mut expected: Vec<u64> = fragments
                .iter()
                .filter(|f| self.prepare_record(document_key, f).is_ok())
                .map(|f| f.node_id)
                .collect();
            expected.sort_unstable();
            expected_total += expected.len() as u64;

            let stored: Vec<u64> = self
                .store
                .scan_by_document(document_key)?
                .into_iter()
                .map(|r| r.node_id)
                .collect();
            if stored != expected {
                log::warn!(
                    "index check failed for {}: stored {:?}, expected {:?}",
                    document_key,
                    stored,
                    expected
                );
                return Ok(false);
            }
        }

        let total = self.store.count()?;
        if total != expected_total {
            log::warn!(
                "index check failed: store holds {} record(s), expected {}",
                total,
                expected_total
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Extract, reproject and envelope one fragment.
    fn prepare_record(&self, document_key: &str, fragment: &Fragment) -> Result<SpatialRecord> {
        let extracted = GeometryExtractor::extract(fragment.events.iter().cloned())?;
        let source_srs = extracted
            .srs
            .unwrap_or_else(|| self.canonical_srs.clone());

        let canonical =
            if source_srs.eq_ignore_ascii_case(&self.canonical_srs) {
                extracted.geometry
            } else {
                self.transform_geometry(&extracted.geometry, &source_srs, &self.canonical_srs)?
            };

        let envelope = Envelope::of(&canonical).ok_or_else(|| {
            GeodexError::UnrecognizedGeometry("geometry has no extent".to_string())
        })?;

        Ok(SpatialRecord {
            document_key: document_key.to_string(),
            node_id: fragment.node_id,
            envelope,
            geometry: codec::encode_geometry(&canonical)?,
            srs: source_srs,
        })
    }
}

impl DocumentIndex for IndexWorker {
    fn on_store(&self, document_key: &str, fragments: &[Fragment]) -> Result<IndexSummary> {
        self.store_document(document_key, fragments)
    }

    fn on_update(&self, document_key: &str, fragments: &[Fragment]) -> Result<IndexSummary> {
        self.update_document(document_key, fragments)
    }

    fn on_remove(&self, document_key: &str) -> Result<usize> {
        self.remove_document(document_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ShapeKind;
    use FragmentEvent::*;

    fn point_fragment(node_id: u64, x: f64, y: f64, srs: Option<&str>) -> Fragment {
        Fragment::new(
            node_id,
            vec![
                ShapeStart {
                    kind: ShapeKind::Point,
                    srs: srs.map(str::to_string),
                },
                Coord { x, y },
                ShapeEnd,
            ],
        )
    }

    fn broken_fragment(node_id: u64) -> Fragment {
        // Unclosed ring.
        Fragment::new(
            node_id,
            vec![
                ShapeStart {
                    kind: ShapeKind::Polygon,
                    srs: None,
                },
                RingStart,
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 1.0, y: 0.0 },
                Coord { x: 1.0, y: 1.0 },
                Coord { x: 0.0, y: 1.0 },
                RingEnd,
                ShapeEnd,
            ],
        )
    }

    #[test]
    fn test_store_document_contains_fragment_failures() {
        let worker = IndexWorker::memory().unwrap();
        let fragments = vec![
            point_fragment(1, 1.0, 1.0, None),
            broken_fragment(2),
            point_fragment(3, 3.0, 3.0, None),
        ];

        let summary = worker.store_document("/db/doc#1", &fragments).unwrap();
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.skipped, 1);

        let node_ids: Vec<u64> = worker
            .store()
            .scan_by_document("/db/doc#1")
            .unwrap()
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(node_ids, vec![1, 3]);
    }

    #[test]
    fn test_unknown_srs_fragment_is_skipped() {
        let worker = IndexWorker::memory().unwrap();
        let fragments = vec![
            point_fragment(1, 1.0, 1.0, Some("osgb:BNG")),
            point_fragment(2, 2.0, 2.0, Some("EPSG:4326")),
        ];

        let summary = worker.store_document("/db/doc#1", &fragments).unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_mercator_fragment_is_normalized() {
        let worker = IndexWorker::memory().unwrap();
        // Web-mercator origin projects to geographic (0, 0).
        let fragments = vec![point_fragment(1, 0.0, 0.0, Some("EPSG:3857"))];
        worker.store_document("/db/doc#1", &fragments).unwrap();

        let records = worker.store().scan_by_document("/db/doc#1").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].envelope.min_x.abs() < 1e-9);
        assert_eq!(records[0].srs, "EPSG:3857");
    }

    #[test]
    fn test_update_replaces_records() {
        let worker = IndexWorker::memory().unwrap();
        worker
            .store_document(
                "/db/doc#1",
                &[
                    point_fragment(1, 1.0, 1.0, None),
                    point_fragment(2, 2.0, 2.0, None),
                ],
            )
            .unwrap();

        worker
            .update_document("/db/doc#1", &[point_fragment(7, 7.0, 7.0, None)])
            .unwrap();

        let records = worker.store().scan_by_document("/db/doc#1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id, 7);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let worker = IndexWorker::memory().unwrap();
        worker
            .store_document("/db/doc#1", &[point_fragment(1, 1.0, 1.0, None)])
            .unwrap();

        assert_eq!(worker.remove_document("/db/doc#1").unwrap(), 1);
        assert_eq!(worker.remove_document("/db/doc#1").unwrap(), 0);
    }

    #[test]
    fn test_check_index() {
        let worker = IndexWorker::memory().unwrap();
        let fragments = vec![
            point_fragment(1, 1.0, 1.0, None),
            broken_fragment(2),
            point_fragment(3, 3.0, 3.0, None),
        ];
        worker.store_document("/db/doc#1", &fragments).unwrap();

        // Skipped fragments are expected to be absent.
        assert!(worker.check_index(&[("/db/doc#1", &fragments)]).unwrap());

        // A record the store should not hold fails the check.
        worker
            .store_document("/db/ghost#1", &[point_fragment(1, 9.0, 9.0, None)])
            .unwrap();
        assert!(!worker.check_index(&[("/db/doc#1", &fragments)]).unwrap());
    }

    #[test]
    fn test_stored_geometry_lookup() {
        let worker = IndexWorker::memory().unwrap();
        worker
            .store_document("/db/doc#1", &[point_fragment(1, 4.0, 5.0, None)])
            .unwrap();

        let geometry = worker.stored_geometry("/db/doc#1", 1).unwrap().unwrap();
        assert_eq!(geometry, Geometry::Point(geo::Point::new(4.0, 5.0)));
        assert!(worker.stored_geometry("/db/doc#1", 2).unwrap().is_none());
    }

    #[test]
    fn test_stored_srs_lookup() {
        let worker = IndexWorker::memory().unwrap();
        worker
            .store_document(
                "/db/doc#1",
                &[
                    point_fragment(1, 0.0, 0.0, Some("EPSG:3857")),
                    point_fragment(2, 2.0, 2.0, None),
                ],
            )
            .unwrap();

        // The declared reference survives even though the stored geometry
        // is normalized to the canonical SRS.
        assert_eq!(
            worker.stored_srs("/db/doc#1", 1).unwrap().as_deref(),
            Some("EPSG:3857")
        );
        assert_eq!(
            worker.stored_srs("/db/doc#1", 2).unwrap().as_deref(),
            Some("EPSG:4326")
        );
        assert!(worker.stored_srs("/db/doc#1", 9).unwrap().is_none());
    }

    #[test]
    fn test_search_transforms_query() {
        let worker = IndexWorker::memory().unwrap();
        worker
            .store_document("/db/doc#1", &[point_fragment(1, 0.0, 0.0, None)])
            .unwrap();

        // The same point expressed in web-mercator.
        let query = Geometry::Point(geo::Point::new(0.0, 0.0));
        let hits = worker
            .search(Some(&query), "EPSG:3857", SpatialOperator::Equals, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, 1);
    }

    #[test]
    fn test_registry() {
        let registry = IndexRegistry::new();
        assert!(registry.is_empty());

        let worker: Arc<dyn DocumentIndex> = Arc::new(IndexWorker::memory().unwrap());
        registry.register("spatial", Arc::clone(&worker));
        assert_eq!(registry.names(), vec!["spatial".to_string()]);

        let found = registry.get("spatial").unwrap();
        found
            .on_store("/db/doc#1", &[point_fragment(1, 1.0, 1.0, None)])
            .unwrap();

        assert!(registry.unregister("spatial").is_some());
        assert!(registry.get("spatial").is_none());
    }
}
