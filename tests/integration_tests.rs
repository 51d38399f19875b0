use geo::polygon;
use geodex::prelude::*;
use geodex::{functions, IndexWorker};

fn point_fragment(node_id: u64, x: f64, y: f64) -> Fragment {
    Fragment::new(
        node_id,
        vec![
            FragmentEvent::ShapeStart {
                kind: ShapeKind::Point,
                srs: None,
            },
            FragmentEvent::Coord { x, y },
            FragmentEvent::ShapeEnd,
        ],
    )
}

fn polygon_fragment(node_id: u64, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Fragment {
    Fragment::new(
        node_id,
        vec![
            FragmentEvent::ShapeStart {
                kind: ShapeKind::Polygon,
                srs: Some("EPSG:4326".to_string()),
            },
            FragmentEvent::RingStart,
            FragmentEvent::Coord { x: min_x, y: min_y },
            FragmentEvent::Coord { x: max_x, y: min_y },
            FragmentEvent::Coord { x: max_x, y: max_y },
            FragmentEvent::Coord { x: min_x, y: max_y },
            FragmentEvent::Coord { x: min_x, y: min_y },
            FragmentEvent::RingEnd,
            FragmentEvent::ShapeEnd,
        ],
    )
}

fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
        (x: min_x, y: min_y),
    ])
}

fn search_ids(
    worker: &IndexWorker,
    query: &Geometry<f64>,
    operator: SpatialOperator,
) -> Vec<u64> {
    let mut ids: Vec<u64> = worker
        .search(Some(query), "EPSG:4326", operator, None)
        .unwrap()
        .into_iter()
        .map(|m| m.node_id)
        .collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_document_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let worker = IndexWorker::memory().unwrap();
    let doc = "/db/mondial#1";

    let summary = worker
        .store_document(
            doc,
            &[point_fragment(1, 1.0, 1.0), point_fragment(2, 2.0, 2.0)],
        )
        .unwrap();
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(worker.store().count().unwrap(), 2);

    // Update replaces the whole record set.
    worker
        .update_document(doc, &[point_fragment(5, 5.0, 5.0)])
        .unwrap();
    assert_eq!(worker.store().count().unwrap(), 1);

    let query = Geometry::Point(Point::new(5.0, 5.0));
    let hits = worker
        .search(Some(&query), "EPSG:4326", SpatialOperator::Equals, None)
        .unwrap();
    assert_eq!(hits, vec![NodeMatch {
        document_key: doc.to_string(),
        node_id: 5,
    }]);

    assert_eq!(worker.remove_document(doc).unwrap(), 1);
    assert_eq!(worker.store().count().unwrap(), 0);
    assert!(worker
        .search(Some(&query), "EPSG:4326", SpatialOperator::Equals, None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_check_index_detects_out_of_band_changes() {
    let worker = IndexWorker::memory().unwrap();
    let fragments = vec![point_fragment(1, 1.0, 1.0), point_fragment(2, 2.0, 2.0)];
    worker.store_document("/db/doc#1", &fragments).unwrap();

    assert!(worker.check_index(&[("/db/doc#1", &fragments)]).unwrap());

    // A row deleted behind the worker's back must fail the check.
    let conn = rusqlite::Connection::open_with_flags(
        worker.store().uri(),
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .unwrap();
    conn.execute("DELETE FROM spatial_index WHERE node_id = 2", [])
        .unwrap();

    assert!(!worker.check_index(&[("/db/doc#1", &fragments)]).unwrap());
}

#[test]
fn test_operator_search_over_polygons() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document(
            "/db/doc#1",
            &[
                polygon_fragment(1, 0.0, 0.0, 10.0, 10.0),
                polygon_fragment(2, 2.0, 2.0, 8.0, 8.0),   // inside 1
                polygon_fragment(3, 5.0, 5.0, 15.0, 15.0), // overlaps 1
                polygon_fragment(4, 10.0, 0.0, 20.0, 10.0), // shares 1's east edge
                polygon_fragment(5, 40.0, 40.0, 50.0, 50.0), // far away
            ],
        )
        .unwrap();

    let query = rect(0.0, 0.0, 10.0, 10.0);

    assert_eq!(search_ids(&worker, &query, SpatialOperator::Equals), vec![1]);
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Within), vec![1, 2]);
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Contains), vec![1]);
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Overlaps), vec![3]);
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Touches), vec![4]);
    assert_eq!(
        search_ids(&worker, &query, SpatialOperator::Intersects),
        vec![1, 2, 3, 4]
    );
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Disjoint), vec![5]);
}

#[test]
fn test_single_polygon_point_queries() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document("/db/doc#1", &[polygon_fragment(1, 0.0, 0.0, 10.0, 10.0)])
        .unwrap();

    let inside = Geometry::Point(Point::new(5.0, 5.0));
    let far = Geometry::Point(Point::new(100.0, 100.0));
    let p1 = rect(0.0, 0.0, 10.0, 10.0);

    assert_eq!(search_ids(&worker, &inside, SpatialOperator::Intersects), vec![1]);
    assert_eq!(search_ids(&worker, &far, SpatialOperator::Disjoint), vec![1]);
    assert_eq!(search_ids(&worker, &p1, SpatialOperator::Equals), vec![1]);
    assert_eq!(search_ids(&worker, &inside, SpatialOperator::Contains), vec![1]);
    assert!(search_ids(&worker, &far, SpatialOperator::Contains).is_empty());
}

#[test]
fn test_disjoint_complements_intersects() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document(
            "/db/doc#1",
            &(1..=20)
                .map(|n| point_fragment(n, n as f64, n as f64))
                .collect::<Vec<_>>(),
        )
        .unwrap();

    let query = rect(4.5, 4.5, 12.5, 12.5);
    let intersecting = search_ids(&worker, &query, SpatialOperator::Intersects);
    let disjoint = search_ids(&worker, &query, SpatialOperator::Disjoint);

    assert_eq!(intersecting.len() + disjoint.len(), 20);
    assert!(intersecting.iter().all(|id| !disjoint.contains(id)));
    assert_eq!(intersecting, (5..=12).collect::<Vec<u64>>());
}

#[test]
fn test_crosses_boundary_sharing_line() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document("/db/doc#1", &[polygon_fragment(1, 0.0, 0.0, 10.0, 10.0)])
        .unwrap();

    // Enters and leaves the polygon's interior.
    let crossing = Geometry::LineString(LineString::from(vec![(-5.0, 5.0), (15.0, 5.0)]));
    assert_eq!(search_ids(&worker, &crossing, SpatialOperator::Crosses), vec![1]);

    // Runs entirely along the boundary: touches, does not cross.
    let along_edge = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]));
    assert!(search_ids(&worker, &along_edge, SpatialOperator::Crosses).is_empty());
    assert_eq!(
        search_ids(&worker, &along_edge, SpatialOperator::Touches),
        vec![1]
    );
}

#[test]
fn test_unknown_srs_is_contained_per_fragment() {
    let worker = IndexWorker::memory().unwrap();
    let bng_fragment = Fragment::new(
        1,
        vec![
            FragmentEvent::ShapeStart {
                kind: ShapeKind::Point,
                srs: Some("osgb:BNG".to_string()),
            },
            FragmentEvent::Coord {
                x: 278000.0,
                y: 187000.0,
            },
            FragmentEvent::ShapeEnd,
        ],
    );

    let summary = worker
        .store_document("/db/doc#1", &[bng_fragment, point_fragment(2, 2.0, 2.0)])
        .unwrap();
    assert_eq!(summary.indexed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(worker.store().count().unwrap(), 1);
}

#[test]
fn test_mercator_query_round_trip() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document("/db/doc#1", &[point_fragment(1, 0.0, 0.0)])
        .unwrap();

    // Geographic origin and web-mercator origin coincide.
    let query = Geometry::Point(Point::new(0.0, 0.0));
    let hits = worker
        .search(Some(&query), "EPSG:3857", SpatialOperator::Equals, None)
        .unwrap();
    assert_eq!(hits.len(), 1);

    let projected = worker
        .transform_geometry(&query, "EPSG:4326", "EPSG:3857")
        .unwrap();
    let recovered = worker
        .transform_geometry(&projected, "EPSG:3857", "EPSG:4326")
        .unwrap();
    assert_eq!(recovered, query);
}

#[test]
fn test_scope_limits_search() {
    let worker = IndexWorker::memory().unwrap();
    worker
        .store_document("/db/a#1", &[point_fragment(1, 1.0, 1.0)])
        .unwrap();
    worker
        .store_document("/db/b#1", &[point_fragment(1, 2.0, 2.0)])
        .unwrap();

    let query = rect(0.0, 0.0, 10.0, 10.0);
    let scoped = worker
        .search(
            Some(&query),
            "EPSG:4326",
            SpatialOperator::Intersects,
            Some(&["/db/a#1"]),
        )
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].document_key, "/db/a#1");

    let all = worker
        .search(Some(&query), "EPSG:4326", SpatialOperator::Intersects, None)
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_geometry_function_surface() {
    let a = rect(0.0, 0.0, 20.0, 20.0);
    let b = rect(10.0, 10.0, 30.0, 30.0);

    let merged = functions::union(Some(&a), Some(&b)).unwrap().unwrap();
    let env = functions::envelope(Some(&merged)).unwrap();
    assert_eq!(env, Envelope::new(0.0, 0.0, 30.0, 30.0).unwrap());

    let shared = functions::intersection(Some(&a), Some(&b)).unwrap().unwrap();
    assert_eq!(functions::area(Some(&shared)), Some(100.0));

    // Empty-sequence conventions.
    assert_eq!(functions::union(Some(&a), None).unwrap(), Some(a.clone()));
    assert_eq!(functions::intersection(Some(&a), None).unwrap(), None);
    assert!(!functions::intersects(Some(&a), None));

    let buffered = functions::buffer(Some(&a), 5.0, None).unwrap().unwrap();
    assert!(functions::contains(Some(&buffered), Some(&a)));

    let wkt = functions::as_wkt(Some(&a)).unwrap().unwrap();
    assert!(wkt.starts_with("POLYGON"));
}

#[test]
fn test_builder_file_backed_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spatial.db");

    {
        let worker = IndexWorkerBuilder::new().path(&path).build().unwrap();
        worker
            .store_document("/db/doc#1", &[point_fragment(1, 3.0, 4.0)])
            .unwrap();
    }

    // Records survive reopening.
    let worker = IndexWorkerBuilder::new().path(&path).build().unwrap();
    assert_eq!(worker.store().count().unwrap(), 1);
    let query = Geometry::Point(Point::new(3.0, 4.0));
    assert_eq!(search_ids(&worker, &query, SpatialOperator::Equals), vec![1]);
}
