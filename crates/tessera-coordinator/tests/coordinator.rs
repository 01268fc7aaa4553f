//! Coordinator behavior through its inbound APIs.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tessera_codec::prefix::key_payload;
use tessera_codec::{KeyValueCodec, OrderedCodec, OrderedCodecFactory};
use tessera_config::{CoordinatorConfig, ScheduleConfig};
use tessera_coordinator::{
    ApiRegistry, CoordinatorError, LocalRegistry, PlacementCoordinator, ReportApi, ServerApi,
};
use tessera_directory::{Directory, MemoryDirectory};
use tessera_store::{MemoryStore, StoreService};
use tessera_types::{
    ApproximateStats, Column, DataType, EntityId, Executor, ExecutorId, ExecutorStats,
    IndexDefinition, IndexId, Location, RegionId, RegionStats, ScanRange, TableDefinition,
    TableId, Timestamp, Value,
};

const USERS: TableId = TableId::new(1);
const ORDERS: TableId = TableId::new(2);

fn table(id: TableId) -> TableDefinition {
    TableDefinition::new(id, format!("t{id}"), vec![Column::primary("id", DataType::BigInt)])
        .with_replica_count(2)
}

fn setup() -> (Arc<MemoryDirectory>, Arc<PlacementCoordinator>, LocalRegistry) {
    let directory = Arc::new(MemoryDirectory::new());
    directory.create_table(table(USERS), Vec::new()).unwrap();
    directory.create_table(table(ORDERS), Vec::new()).unwrap();

    let coordinator = coordinator(directory.clone(), Arc::new(MemoryStore::new()));
    let registry = LocalRegistry::new();
    coordinator.init(&registry).unwrap();
    (directory, coordinator, registry)
}

fn coordinator(
    directory: Arc<MemoryDirectory>,
    store: Arc<MemoryStore>,
) -> Arc<PlacementCoordinator> {
    let schedule = ScheduleConfig {
        split_size_bytes: 100,
        ..ScheduleConfig::default()
    };
    Arc::new(
        PlacementCoordinator::new(directory, store, &CoordinatorConfig::default(), schedule)
            .unwrap(),
    )
}

fn executor(port: u16) -> Executor {
    Executor::new(Location::new("10.1.0.1", port))
}

/// Polls until `done` holds or five seconds pass.
fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn fully_replicated(directory: &MemoryDirectory) -> bool {
    [USERS, ORDERS].iter().all(|table| {
        directory
            .regions(EntityId::Table(*table))
            .unwrap()
            .iter()
            .all(|region| directory.replicas_of_region(region.id).unwrap().len() == 2)
    })
}

/// A load report with two heavy buckets meeting at `middle`.
fn halves(table: TableId, region: RegionId, middle: Bytes) -> RegionStats {
    RegionStats {
        table,
        region,
        reporter: ExecutorId::new(1),
        approximate: vec![
            ApproximateStats {
                start_key: Bytes::new(),
                end_key: middle.clone(),
                count: 10,
                size: 80,
            },
            ApproximateStats {
                start_key: middle,
                end_key: Bytes::new(),
                count: 10,
                size: 80,
            },
        ],
        qps: 5,
        reported_at: Timestamp::now(),
    }
}

#[test]
fn init_binds_apis_and_loads_every_table() {
    let (_directory, coordinator, registry) = setup();
    assert!(coordinator.is_initialized());
    assert!(registry.server().is_some());
    assert!(registry.report().is_some());
    assert_eq!(coordinator.schedulers().len(), 2);

    assert!(matches!(
        coordinator.init(&registry),
        Err(CoordinatorError::AlreadyInitialized)
    ));
}

#[test]
fn registration_converges_to_full_replication() {
    let (directory, coordinator, registry) = setup();
    let server = registry.server().unwrap();

    let first = server.register_executor(executor(1)).unwrap();
    let second = server.register_executor(executor(2)).unwrap();
    assert_ne!(first, second);

    assert!(eventually(|| fully_replicated(&directory)));

    let parts = coordinator.store_map(first).unwrap();
    assert_eq!(parts.len(), 2);
    for part in parts {
        assert_eq!(part.replicas.len(), 2);
        assert!(part.replicas.contains(&Location::new("10.1.0.1", 1)));
        assert!(part.replicas.contains(&Location::new("10.1.0.1", 2)));
    }
}

#[test]
fn re_registration_keeps_the_id() {
    let (_directory, coordinator, _registry) = setup();
    let id = coordinator.register_executor(executor(7)).unwrap();
    assert_eq!(coordinator.register_executor(executor(7)).unwrap(), id);
    assert_eq!(
        coordinator
            .register_executor(executor(8).with_id(id))
            .unwrap(),
        id
    );
}

#[test]
fn store_map_of_unknown_executor_is_empty() {
    let (_directory, coordinator, _registry) = setup();
    assert!(coordinator.store_map(ExecutorId::new(42)).unwrap().is_empty());
}

#[test]
fn concurrent_lookups_share_one_scheduler() {
    let directory = Arc::new(MemoryDirectory::new());
    directory.create_table(table(USERS), Vec::new()).unwrap();
    // Not initialized: every scheduler is built lazily.
    let coordinator = coordinator(directory, Arc::new(MemoryStore::new()));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                coordinator.scheduler(USERS).unwrap()
            })
        })
        .collect();
    let schedulers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(schedulers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(coordinator.schedulers().len(), 1);
}

#[test]
fn removed_scheduler_is_rebuilt_on_demand() {
    let (_directory, coordinator, _registry) = setup();
    let before = coordinator.scheduler(USERS).unwrap();
    assert!(coordinator.remove_scheduler(USERS).is_some());
    assert_eq!(coordinator.schedulers().len(), 1);

    let after = coordinator.scheduler(USERS).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[test]
fn region_reports_route_by_table() {
    let (directory, coordinator, registry) = setup();
    let report = registry.report().unwrap();
    let region = directory.regions(EntityId::Table(USERS)).unwrap()[0].id;
    let stats = |table| halves(table, region, Bytes::from_static(b"m"));

    assert!(report.report_region(stats(USERS)).unwrap());
    let tasks = coordinator.scheduler(USERS).unwrap().pending_splits().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].split_key, Bytes::from_static(b"m"));

    // USERS' region reported under ORDERS, and a table nobody created.
    assert!(!report.report_region(stats(ORDERS)).unwrap());
    assert!(!report.report_region(stats(TableId::new(99))).unwrap());
    assert!(directory.split_tasks(ORDERS).unwrap().is_empty());

    let created = coordinator.scheduler(USERS).unwrap().execute_splits().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(directory.regions(EntityId::Table(USERS)).unwrap().len(), 2);
}

#[test]
fn executor_reports_are_accepted() {
    let (_directory, coordinator, _registry) = setup();
    let stats = ExecutorStats {
        executor: ExecutorId::new(1),
        region_count: 3,
        used_bytes: 1 << 20,
        reported_at: Timestamp::now(),
    };
    assert!(coordinator.report_executor(stats).unwrap());
}

#[test]
fn registry_keeps_the_latest_binding() {
    let (_directory, coordinator, registry) = setup();
    registry.register_server_api(coordinator.clone());
    let server = registry.server().unwrap();
    assert!(server.store_map(ExecutorId::new(1)).unwrap().is_empty());
}

#[test]
fn rows_stay_reachable_across_a_split() {
    const ACCOUNTS: TableId = TableId::new(3);
    let table = TableDefinition::new(
        ACCOUNTS,
        "accounts",
        vec![
            Column::primary("id", DataType::BigInt),
            Column::new("name", DataType::Text),
        ],
    );
    let index = IndexDefinition::scalar(IndexId::new(30), ACCOUNTS, "by_name", ["name"]);
    let directory = Arc::new(MemoryDirectory::new());
    directory.create_table(table.clone(), vec![index.clone()]).unwrap();
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(directory.clone(), store.clone());
    let service = StoreService::new(directory.clone(), store, Arc::new(OrderedCodecFactory));

    let names = ["a", "b", "c", "d"];
    let row = |id: i64| vec![Value::BigInt(id), Value::from(names[(id - 1) as usize])];
    let table_region = directory.regions(EntityId::Table(ACCOUNTS)).unwrap()[0].id;
    let proxy = service.instance(ACCOUNTS, table_region).unwrap();
    for id in 1..=4 {
        assert!(proxy.insert_with_index(&row(id)).unwrap());
    }

    // Split the table at id 3 and the index at name "c".
    let table_codec = OrderedCodec::for_table(&table).unwrap();
    let index_codec = OrderedCodec::for_index(&table, &index).unwrap();
    let row_key = |id: i64| table_codec.encode_key_prefix(&[Value::BigInt(id)]).unwrap();
    let table_split = Bytes::copy_from_slice(key_payload(&row_key(3)).unwrap());
    let name_key = index_codec.encode_key_prefix(&[Value::from("c")]).unwrap();
    let index_split = Bytes::copy_from_slice(key_payload(&name_key).unwrap());
    let index_region = directory.regions(EntityId::Index(index.id)).unwrap()[0].id;
    assert!(coordinator.report_region(halves(ACCOUNTS, table_region, table_split)).unwrap());
    assert!(coordinator.report_region(halves(ACCOUNTS, index_region, index_split)).unwrap());

    let created = coordinator.scheduler(ACCOUNTS).unwrap().execute_splits().unwrap();
    assert_eq!(created.len(), 2);

    let all = ScanRange::half_open(Bytes::new(), Bytes::new());
    for id in 1..=4 {
        let owner = service.instance_for_key(ACCOUNTS, &row_key(id)).unwrap();
        assert_eq!(owner.get_row(&[Value::BigInt(id)]).unwrap(), Some(row(id)));
        assert_eq!(owner.count(&all).unwrap(), 2);
        assert_eq!(
            owner.index_lookup("by_name", &[Value::from(names[(id - 1) as usize])]).unwrap(),
            vec![vec![Value::BigInt(id)]]
        );
    }
}
