use terna::{Config, GraphError, GraphStore, PropertyMap, PropertyValue};

use std::collections::HashSet;
use std::fs;
use tempfile::tempdir;

fn open_store(dir: &std::path::Path) -> GraphStore {
    GraphStore::open(dir, &Config::default()).expect("open store")
}

#[test]
fn fresh_files_get_their_headers() {
    let dir = tempdir().expect("temp dir");
    let _store = open_store(dir.path());

    assert_eq!(fs::read(dir.path().join("db.properties")).unwrap(), 4u32.to_be_bytes());
    assert_eq!(fs::read(dir.path().join("db.node_ids")).unwrap(), 1i32.to_be_bytes());
    assert_eq!(fs::read(dir.path().join("db.edges")).unwrap(), 1i32.to_be_bytes());
}

#[test]
fn on_disk_layout_is_bit_exact() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let n1 = store
        .create_node(PropertyMap::from([("name", "alice")]))
        .expect("node 1");
    let n2 = store.create_node(PropertyMap::new()).expect("node 2");
    let e1 = store
        .create_edge(n1, PropertyMap::from([("weight", PropertyValue::Int(5))]), n2)
        .expect("edge 1");
    assert_eq!((n1, n2, e1), (1, 2, 1));

    // PROPERTIES: header, then the three appended records.
    let props = fs::read(dir.path().join("db.properties")).unwrap();
    let mut expect = Vec::new();
    expect.extend_from_slice(&63u32.to_be_bytes()); // cur_node_addr
    expect.extend_from_slice(&25u32.to_be_bytes()); // rec_len of node 1
    expect.extend_from_slice(&1u32.to_be_bytes()); // num_props
    expect.extend_from_slice(&4u32.to_be_bytes()); // key_strlen
    expect.extend_from_slice(b"name");
    expect.extend_from_slice(&5i32.to_be_bytes()); // val_desc: TEXT of 5 bytes
    expect.extend_from_slice(b"alice");
    expect.extend_from_slice(&8u32.to_be_bytes()); // empty record of node 2
    expect.extend_from_slice(&0u32.to_be_bytes());
    expect.extend_from_slice(&26u32.to_be_bytes()); // rec_len of the edge props
    expect.extend_from_slice(&1u32.to_be_bytes());
    expect.extend_from_slice(&6u32.to_be_bytes());
    expect.extend_from_slice(b"weight");
    expect.extend_from_slice(&(-2i32).to_be_bytes()); // val_desc: INT
    expect.extend_from_slice(&5i32.to_be_bytes());
    assert_eq!(props, expect);

    // NODE_IDS: counter then two 12-byte slots with list heads.
    let node_ids = fs::read(dir.path().join("db.node_ids")).unwrap();
    let mut expect = Vec::new();
    expect.extend_from_slice(&3i32.to_be_bytes()); // cur_node_id
    expect.extend_from_slice(&4u32.to_be_bytes()); // slot 1: addr
    expect.extend_from_slice(&1u32.to_be_bytes()); // edge_from = edge 1
    expect.extend_from_slice(&0u32.to_be_bytes()); // edge_to
    expect.extend_from_slice(&29u32.to_be_bytes()); // slot 2: addr
    expect.extend_from_slice(&0u32.to_be_bytes());
    expect.extend_from_slice(&1u32.to_be_bytes()); // edge_to = edge 1
    assert_eq!(node_ids, expect);

    // EDGES: counter then one 28-byte record.
    let edges = fs::read(dir.path().join("db.edges")).unwrap();
    let mut expect = Vec::new();
    expect.extend_from_slice(&2i32.to_be_bytes()); // cur_eid
    for field in [1u32, 2, 0, 0, 0, 0, 37] {
        expect.extend_from_slice(&field.to_be_bytes());
    }
    assert_eq!(edges, expect);
}

#[test]
fn propertyless_edges_have_no_record() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");
    let tail_before = fs::read(dir.path().join("db.properties")).unwrap().len();
    let e = store.create_edge(a, PropertyMap::new(), b).expect("edge");

    // props_addr is 0 and nothing was appended to the heap.
    let edges = fs::read(dir.path().join("db.edges")).unwrap();
    let props_addr = u32::from_be_bytes(edges[28..32].try_into().unwrap());
    assert_eq!(props_addr, 0);
    assert_eq!(
        fs::read(dir.path().join("db.properties")).unwrap().len(),
        tail_before
    );
    assert!(store.get_edge(e).expect("get edge").props.is_empty());
}

#[test]
fn adjacency_is_lifo_and_delete_relinks() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");

    let e1 = store
        .create_edge(a, PropertyMap::from([("weight", PropertyValue::Int(5))]), b)
        .expect("e1");
    let e2 = store
        .create_edge(a, PropertyMap::from([("weight", PropertyValue::Int(7))]), b)
        .expect("e2");

    let from_a: Vec<_> = store.edges_from(a).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(from_a, vec![e2, e1]);
    let to_b: Vec<_> = store.edges_to(b).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(to_b, vec![e2, e1]);

    store.delete_edge(e1).expect("delete e1");
    let from_a: Vec<_> = store.edges_from(a).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(from_a, vec![e2]);

    // Deleting the head relinks the slot itself.
    store.delete_edge(e2).expect("delete e2");
    assert_eq!(store.edges_from(a).unwrap().count(), 0);
    assert_eq!(store.edges_to(b).unwrap().count(), 0);
}

#[test]
fn deleted_edge_is_tombstoned_in_place() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");
    let e = store.create_edge(a, PropertyMap::new(), b).expect("edge");
    store.delete_edge(e).expect("delete");

    let edges = fs::read(dir.path().join("db.edges")).unwrap();
    let from_nid = u32::from_be_bytes(edges[4..8].try_into().unwrap());
    assert_eq!(from_nid, 0);

    assert!(matches!(store.get_edge(e), Err(GraphError::NotFound("edge"))));
    // Idempotent.
    store.delete_edge(e).expect("second delete");
}

#[test]
fn ids_are_never_reused() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");
    let e = store.create_edge(a, PropertyMap::new(), b).expect("edge");

    store.delete_node(a).expect("delete a");
    assert!(matches!(store.get_edge(e), Err(GraphError::NotFound("edge"))));

    let c = store.create_node(PropertyMap::new()).expect("c");
    let e2 = store.create_edge(b, PropertyMap::new(), c).expect("edge 2");
    assert_eq!(c, 3);
    assert_eq!(e2, 2);
    assert_eq!(store.next_node_id(), 4);
    assert_eq!(store.next_edge_id(), 3);
}

#[test]
fn self_loop_links_and_unlinks_cleanly() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let n = store.create_node(PropertyMap::new()).expect("node");
    let e = store.create_edge(n, PropertyMap::new(), n).expect("loop");

    let from: Vec<_> = store.edges_from(n).unwrap().collect::<Result<_, _>>().unwrap();
    let to: Vec<_> = store.edges_to(n).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(from, vec![e]);
    assert_eq!(to, vec![e]);

    store.delete_edge(e).expect("delete loop");
    assert_eq!(store.edges_from(n).unwrap().count(), 0);
    assert_eq!(store.edges_to(n).unwrap().count(), 0);

    // Both slot heads really are zero on disk.
    let node_ids = fs::read(dir.path().join("db.node_ids")).unwrap();
    assert_eq!(&node_ids[8..16], &[0u8; 8]);
}

#[test]
fn stacked_self_loops_delete_in_any_order() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let n = store.create_node(PropertyMap::new()).expect("node");
    let e1 = store.create_edge(n, PropertyMap::new(), n).expect("loop 1");
    let e2 = store.create_edge(n, PropertyMap::new(), n).expect("loop 2");
    let e3 = store.create_edge(n, PropertyMap::new(), n).expect("loop 3");

    // Delete the middle one first: both of its neighbours are self-loops
    // whose side-1 and side-2 pointers must survive independently.
    store.delete_edge(e2).expect("delete middle");
    let from: Vec<_> = store.edges_from(n).unwrap().collect::<Result<_, _>>().unwrap();
    let to: Vec<_> = store.edges_to(n).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(from, vec![e3, e1]);
    assert_eq!(to, vec![e3, e1]);

    store.delete_edge(e3).expect("delete head");
    store.delete_edge(e1).expect("delete tail");
    assert_eq!(store.edges_from(n).unwrap().count(), 0);
    assert_eq!(store.edges_to(n).unwrap().count(), 0);
}

#[test]
fn delete_node_cascades_and_leaves_peers_consistent() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");
    store.create_edge(a, PropertyMap::new(), b).expect("a->b");
    store.create_edge(b, PropertyMap::new(), a).expect("b->a");
    store.create_edge(a, PropertyMap::new(), a).expect("loop on a");

    store.delete_node(a).expect("delete a");

    assert!(matches!(store.get_node(a), Err(GraphError::NotFound("node"))));
    assert_eq!(store.edges_from(b).unwrap().count(), 0);
    assert_eq!(store.edges_to(b).unwrap().count(), 0);
    assert!(store.edge_ids().expect("edge ids").is_empty());

    // Idempotent on the tombstone, NotFound for never-allocated ids.
    store.delete_node(a).expect("second delete");
    assert!(matches!(store.delete_node(99), Err(GraphError::NotFound("node"))));
}

#[test]
fn adjacency_lists_agree_with_a_full_scan() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let nodes: Vec<_> = (0..5)
        .map(|_| store.create_node(PropertyMap::new()).expect("node"))
        .collect();
    let mut edges = Vec::new();
    for (i, &from) in nodes.iter().enumerate() {
        for &to in &nodes[i..] {
            edges.push(store.create_edge(from, PropertyMap::new(), to).expect("edge"));
        }
    }
    // Knock out a few and one endpoint.
    store.delete_edge(edges[3]).expect("delete");
    store.delete_edge(edges[7]).expect("delete");
    store.delete_node(nodes[4]).expect("delete node");

    for &n in &nodes[..4] {
        let listed: HashSet<_> = store
            .edges_from(n)
            .unwrap()
            .collect::<Result<HashSet<_>, _>>()
            .unwrap();
        let mut scanned = HashSet::new();
        for eid in store.edge_ids().expect("edge ids") {
            if store.get_edge(eid).expect("get edge").from == n {
                scanned.insert(eid);
            }
        }
        assert_eq!(listed, scanned, "outgoing list of node {n}");

        let listed: HashSet<_> = store
            .edges_to(n)
            .unwrap()
            .collect::<Result<HashSet<_>, _>>()
            .unwrap();
        let mut scanned = HashSet::new();
        for eid in store.edge_ids().expect("edge ids") {
            if store.get_edge(eid).expect("get edge").to == n {
                scanned.insert(eid);
            }
        }
        assert_eq!(listed, scanned, "incoming list of node {n}");
    }
}

#[test]
fn update_edge_rewrites_the_record_pointer() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    let b = store.create_node(PropertyMap::new()).expect("b");
    let e = store
        .create_edge(a, PropertyMap::from([("w", PropertyValue::Int(1))]), b)
        .expect("edge");

    store
        .update_edge(e, PropertyMap::from([("w", PropertyValue::Int(2))]))
        .expect("update");
    assert_eq!(
        store.get_edge(e).expect("get").props.get("w"),
        Some(&PropertyValue::Int(2))
    );

    store.update_edge(e, PropertyMap::new()).expect("clear");
    assert!(store.get_edge(e).expect("get").props.is_empty());
}

#[test]
fn endpoints_must_exist_to_create_an_edge() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());

    let a = store.create_node(PropertyMap::new()).expect("a");
    assert!(matches!(
        store.create_edge(a, PropertyMap::new(), 9),
        Err(GraphError::NotFound("node"))
    ));
    store.delete_node(a).expect("delete");
    assert!(matches!(
        store.create_edge(a, PropertyMap::new(), a),
        Err(GraphError::NotFound("node"))
    ));
}

#[test]
fn everything_survives_reopen() {
    let dir = tempdir().expect("temp dir");
    {
        let mut store = open_store(dir.path());
        let a = store
            .create_node(PropertyMap::from([("name", "alice")]))
            .expect("a");
        let b = store.create_node(PropertyMap::from([("name", "bob")])).expect("b");
        store
            .create_edge(a, PropertyMap::from([("since", PropertyValue::Int(2019))]), b)
            .expect("edge");
        store.flush().expect("flush");
    }

    let mut store = open_store(dir.path());
    assert_eq!(store.next_node_id(), 3);
    assert_eq!(store.next_edge_id(), 2);
    let edge = store.get_edge(1).expect("edge");
    assert_eq!(edge.from, 1);
    assert_eq!(edge.to, 2);
    assert_eq!(edge.props.get("since"), Some(&PropertyValue::Int(2019)));
    let from_a: Vec<_> = store.edges_from(1).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(from_a, vec![1]);
}

#[test]
fn bad_counter_header_refuses_to_open() {
    let dir = tempdir().expect("temp dir");
    drop(open_store(dir.path()));

    fs::write(dir.path().join("db.node_ids"), 0i32.to_be_bytes()).unwrap();
    let err = GraphStore::open(dir.path(), &Config::default()).unwrap_err();
    assert!(matches!(err, GraphError::Corruption(_)));
}

#[test]
fn properties_header_past_eof_refuses_to_open() {
    let dir = tempdir().expect("temp dir");
    drop(open_store(dir.path()));

    fs::write(dir.path().join("db.properties"), 4096u32.to_be_bytes()).unwrap();
    let err = GraphStore::open(dir.path(), &Config::default()).unwrap_err();
    assert!(matches!(err, GraphError::Corruption(_)));
}

#[test]
fn corrupt_val_desc_surfaces_as_corruption() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path());
    store
        .create_node(PropertyMap::from([("v", PropertyValue::Int(1))]))
        .expect("node");
    drop(store);

    // val_desc of the single property: header(4) + rec_len(4) +
    // num_props(4) + key_strlen(4) + "v"(1).
    let path = dir.path().join("db.properties");
    let mut bytes = fs::read(&path).unwrap();
    bytes[17..21].copy_from_slice(&(-9i32).to_be_bytes());
    fs::write(&path, bytes).unwrap();

    let mut store = open_store(dir.path());
    assert!(matches!(store.get_node(1), Err(GraphError::Corruption(_))));
}

#[test]
fn custom_db_name_places_the_files() {
    let dir = tempdir().expect("temp dir");
    let mut store = GraphStore::open(dir.path(), &Config::named("fleet0")).expect("open");
    store.create_node(PropertyMap::new()).expect("node");

    assert!(dir.path().join("fleet0.properties").exists());
    assert!(dir.path().join("fleet0.node_ids").exists());
    assert!(dir.path().join("fleet0.edges").exists());
    assert!(!dir.path().join("db.properties").exists());
}
