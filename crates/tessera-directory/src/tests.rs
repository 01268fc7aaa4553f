//! Unit tests for tessera-directory

use std::sync::{Arc, Barrier};
use std::thread;

use bytes::Bytes;
use tessera_types::{
    Column, DataType, EntityId, Executor, ExecutorId, IndexDefinition, IndexId, Location,
    RegionId, Replica, TableDefinition, TableId,
};
use test_case::test_case;

use crate::{Directory, DirectoryError, MemoryDirectory};

const TABLE: TableId = TableId::new(1);

fn table() -> TableDefinition {
    TableDefinition::new(
        TABLE,
        "users",
        vec![
            Column::primary("id", DataType::BigInt),
            Column::new("name", DataType::Text),
        ],
    )
}

fn directory_with_index() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory
        .create_table(
            table(),
            vec![IndexDefinition::scalar(IndexId::new(7), TABLE, "by_name", ["name"])],
        )
        .unwrap();
    directory
}

fn table_entity() -> EntityId {
    EntityId::Table(TABLE)
}

// ============================================================================
// Schema and initial regions
// ============================================================================

#[test]
fn create_table_gives_table_and_index_full_regions() {
    let directory = directory_with_index();

    let table_regions = directory.regions(table_entity()).unwrap();
    let index_regions = directory.regions(EntityId::Index(IndexId::new(7))).unwrap();
    assert_eq!(table_regions.len(), 1);
    assert_eq!(index_regions.len(), 1);
    assert_ne!(table_regions[0].id, index_regions[0].id);
    assert!(table_regions[0].range.start.is_empty());
    assert!(table_regions[0].range.end.is_none());
}

#[test]
fn duplicate_table_is_rejected() {
    let directory = directory_with_index();
    assert_eq!(
        directory.create_table(table(), Vec::new()),
        Err(DirectoryError::TableExists(TABLE))
    );
}

#[test]
fn index_of_another_table_is_rejected() {
    let directory = MemoryDirectory::new();
    let foreign = IndexDefinition::scalar(IndexId::new(3), TableId::new(99), "x", ["name"]);
    assert!(matches!(
        directory.create_table(table(), vec![foreign]),
        Err(DirectoryError::ForeignIndex { .. })
    ));
}

#[test]
fn table_indexes_are_ordered_by_id() {
    let directory = MemoryDirectory::new();
    directory
        .create_table(
            table(),
            vec![
                IndexDefinition::scalar(IndexId::new(9), TABLE, "b", ["name"]),
                IndexDefinition::scalar(IndexId::new(4), TABLE, "a", ["name"]),
            ],
        )
        .unwrap();
    let ids: Vec<_> = directory
        .table_indexes(TABLE)
        .unwrap()
        .iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec![IndexId::new(4), IndexId::new(9)]);
}

#[test]
fn unknown_table_returns_error() {
    let directory = MemoryDirectory::new();
    assert_eq!(
        directory.table(TableId::new(5)),
        Err(DirectoryError::TableNotFound(TableId::new(5)))
    );
    assert!(directory.table_indexes(TableId::new(5)).is_err());
}

// ============================================================================
// Region routing and splits
// ============================================================================

#[test]
fn region_for_key_follows_splits() {
    let directory = directory_with_index();
    let original = directory.regions(table_entity()).unwrap()[0].clone();

    let right = directory.split_region(original.id, b"m").unwrap();

    assert_eq!(
        directory.region_for_key(table_entity(), b"a").unwrap().id,
        original.id
    );
    assert_eq!(
        directory.region_for_key(table_entity(), b"m").unwrap().id,
        right.id
    );
    assert_eq!(
        directory.region_for_key(table_entity(), b"zzz").unwrap().id,
        right.id
    );
    // The index key space is untouched.
    assert_eq!(directory.regions(EntityId::Index(IndexId::new(7))).unwrap().len(), 1);
}

#[test_case(b""; "at empty start")]
#[test_case(b"m"; "at existing boundary")]
fn split_outside_range_interior_is_rejected(key: &[u8]) {
    let directory = directory_with_index();
    let original = directory.regions(table_entity()).unwrap()[0].clone();
    directory.split_region(original.id, b"m").unwrap();

    assert_eq!(
        directory.split_region(original.id, key),
        Err(DirectoryError::InvalidSplit(original.id))
    );
}

#[test]
fn split_into_reserved_id_uses_it() {
    let directory = directory_with_index();
    let original = directory.regions(table_entity()).unwrap()[0].clone();
    let reserved = directory.allocate_region_id().unwrap();
    // A reserved id is never handed out twice.
    assert_ne!(directory.allocate_region_id().unwrap(), reserved);

    let right = directory.split_region_as(original.id, b"m", reserved).unwrap();
    assert_eq!(right.id, reserved);
    assert_eq!(directory.region(reserved).unwrap().range.start.as_ref(), b"m");
}

#[test]
fn split_into_existing_id_is_rejected() {
    let directory = directory_with_index();
    let original = directory.regions(table_entity()).unwrap()[0].clone();
    let index_region = directory.regions(EntityId::Index(IndexId::new(7))).unwrap()[0].id;

    assert_eq!(
        directory.split_region_as(original.id, b"m", index_region),
        Err(DirectoryError::RegionExists(index_region))
    );
    assert!(directory.region(original.id).unwrap().range.end.is_none());
}

#[test]
fn split_of_unknown_region_fails() {
    let directory = directory_with_index();
    assert_eq!(
        directory.split_region(RegionId::new(404), b"k"),
        Err(DirectoryError::RegionNotFound(RegionId::new(404)))
    );
}

#[test]
fn unknown_entity_has_no_region() {
    let directory = directory_with_index();
    let ghost = EntityId::Table(TableId::new(2));
    assert_eq!(
        directory.region_for_key(ghost, b"k"),
        Err(DirectoryError::NoRegionForKey(ghost))
    );
}

// ============================================================================
// Executors and replicas
// ============================================================================

#[test]
fn executor_ids_are_assigned_and_kept() {
    let directory = MemoryDirectory::new();
    let a = directory
        .save_executor(Executor::new(Location::new("a", 1)))
        .unwrap();
    let b = directory
        .save_executor(Executor::new(Location::new("b", 1)))
        .unwrap();
    assert_ne!(a, b);

    // Re-registration by id updates the location.
    let again = directory
        .save_executor(Executor::new(Location::new("a2", 1)).with_id(a))
        .unwrap();
    assert_eq!(again, a);
    assert_eq!(directory.executor(a).unwrap().location, Location::new("a2", 1));

    // Re-registration by location keeps the id.
    let same = directory
        .save_executor(Executor::new(Location::new("b", 1)))
        .unwrap();
    assert_eq!(same, b);
    assert_eq!(directory.executors().unwrap().len(), 2);
}

#[test]
fn explicit_id_advances_allocator() {
    let directory = MemoryDirectory::new();
    let explicit = directory
        .save_executor(Executor::new(Location::new("x", 1)).with_id(ExecutorId::new(50)))
        .unwrap();
    let fresh = directory
        .save_executor(Executor::new(Location::new("y", 1)))
        .unwrap();
    assert_eq!(explicit, ExecutorId::new(50));
    assert!(fresh > explicit);
}

#[test]
fn saving_a_leader_demotes_the_previous_one() {
    let directory = directory_with_index();
    let region = directory.regions(table_entity()).unwrap()[0].id;
    let mut ids = Vec::new();
    for host in ["a", "b"] {
        let location = Location::new(host, 9000);
        let id = directory.save_executor(Executor::new(location.clone())).unwrap();
        directory
            .save_replica(Replica {
                region,
                executor: id,
                location,
                leader: true,
            })
            .unwrap();
        ids.push(id);
    }

    let replicas = directory.replicas_of_region(region).unwrap();
    assert_eq!(replicas.len(), 2);
    let leaders: Vec<_> = replicas.iter().filter(|r| r.leader).map(|r| r.executor).collect();
    assert_eq!(leaders, vec![ids[1]]);
    assert_eq!(directory.replicas_by_executor(ids[0]).unwrap().len(), 1);
}

#[test]
fn replica_on_unknown_executor_is_rejected() {
    let directory = directory_with_index();
    let region = directory.regions(table_entity()).unwrap()[0].id;
    let result = directory.save_replica(Replica {
        region,
        executor: ExecutorId::new(8),
        location: Location::new("h", 1),
        leader: false,
    });
    assert_eq!(result, Err(DirectoryError::ExecutorNotFound(ExecutorId::new(8))));
}

// ============================================================================
// Split tasks
// ============================================================================

#[test]
fn split_tasks_are_scoped_by_table_and_removable() {
    let directory = directory_with_index();
    let region = directory.regions(table_entity()).unwrap()[0].id;
    let task = directory
        .save_split_task(TABLE, region, Bytes::from_static(b"k"))
        .unwrap()
        .unwrap();
    directory
        .save_split_task(TableId::new(2), RegionId::new(77), Bytes::from_static(b"k"))
        .unwrap();

    assert_eq!(directory.split_tasks(TABLE).unwrap(), vec![task.clone()]);
    directory.remove_split_task(task.id).unwrap();
    assert!(directory.split_tasks(TABLE).unwrap().is_empty());
    assert_eq!(
        directory.remove_split_task(task.id),
        Err(DirectoryError::SplitTaskNotFound(task.id))
    );
}

#[test]
fn one_pending_split_task_per_region() {
    let directory = directory_with_index();
    let region = directory.regions(table_entity()).unwrap()[0].id;
    let first = directory
        .save_split_task(TABLE, region, Bytes::from_static(b"k"))
        .unwrap();
    assert!(first.is_some());
    assert_eq!(
        directory
            .save_split_task(TABLE, region, Bytes::from_static(b"q"))
            .unwrap(),
        None
    );
    assert_eq!(directory.split_tasks(TABLE).unwrap().len(), 1);
    assert_eq!(directory.split_tasks(TABLE).unwrap()[0].split_key.as_ref(), b"k");
}

// ============================================================================
// Property-Based Tests
// ============================================================================

use proptest::prelude::*;

proptest! {
    /// Property: after any sequence of splits, every key maps to exactly one
    /// region and the regions tile the key space in order.
    #[test]
    fn prop_splits_preserve_coverage(
        splits in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..4), 0..24),
        probes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..5), 1..32),
    ) {
        let directory = directory_with_index();
        for key in &splits {
            let target = directory.region_for_key(table_entity(), key).unwrap();
            // Keys on an existing boundary are rejected; everything else splits.
            match directory.split_region(target.id, key) {
                Ok(_) | Err(DirectoryError::InvalidSplit(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        let regions = directory.regions(table_entity()).unwrap();
        prop_assert!(regions[0].range.start.is_empty());
        prop_assert!(regions.last().unwrap().range.end.is_none());
        for pair in regions.windows(2) {
            prop_assert_eq!(pair[0].range.end.as_ref(), Some(&pair[1].range.start));
        }

        for probe in &probes {
            let owners = regions.iter().filter(|r| r.contains(probe)).count();
            prop_assert_eq!(owners, 1);
            let routed = directory.region_for_key(table_entity(), probe).unwrap();
            prop_assert!(routed.contains(probe));
        }
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn concurrent_split_tasks_for_one_region_record_one() {
    let directory = Arc::new(directory_with_index());
    let region = directory.regions(table_entity()).unwrap()[0].id;
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let dir = Arc::clone(&directory);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dir.save_split_task(TABLE, region, Bytes::from(vec![b'a' + i as u8]))
                    .unwrap()
            })
        })
        .collect();

    let recorded = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .count();
    assert_eq!(recorded, 1);
    assert_eq!(directory.split_tasks(TABLE).unwrap().len(), 1);
}

#[test]
fn concurrent_registration_assigns_unique_ids() {
    let directory = Arc::new(MemoryDirectory::new());
    let mut handles = vec![];

    for i in 0..8u16 {
        let dir = Arc::clone(&directory);
        handles.push(thread::spawn(move || {
            dir.save_executor(Executor::new(Location::new("node", i)))
                .unwrap()
        }));
    }

    let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}
