use std::sync::Arc;

use cqrs_es::{
    mem_store::MemStore,
    persist::{PersistedEventStore, ViewRepository},
    CqrsFramework, EventStore,
};
use dynamo_es::{DynamoEventRepository, DynamoViewRepository};

use super::{
    DispenseLedger, Dropper, IndexQuery, Inventory, LedgerQuery, MemViewRepository, Query,
    ScheduleIndex, Services, View, ViewRepo,
};

pub type DynamoStore = PersistedEventStore<DynamoEventRepository, Dropper>;

/// DynamoDB table names used by the dropper store.
#[derive(Clone, Debug)]
pub struct Tables {
    pub event_log: String,
    pub event_snapshots: String,
    pub droppers_view: String,
    pub schedule_index: String,
}

pub fn init<ES>(
    store: ES,
    repo: ViewRepo,
    index: Arc<dyn ScheduleIndex>,
    ledger: Arc<DispenseLedger>,
) -> Arc<CqrsFramework<Dropper, ES>>
where
    ES: EventStore<Dropper>,
{
    let queries: Vec<Box<dyn cqrs_es::Query<Dropper>>> = vec![
        Box::new(Query::new(repo)),
        Box::new(IndexQuery::new(index)),
        Box::new(LedgerQuery::new(ledger)),
    ];

    Arc::new(CqrsFramework::new(store, queries, Services::default()))
}

/// Wires the framework and its read models into an [`Inventory`].
pub fn inventory<ES>(store: ES, repo: ViewRepo, index: Arc<dyn ScheduleIndex>) -> Inventory<ES>
where
    ES: EventStore<Dropper>,
{
    let ledger = Arc::new(DispenseLedger::default());
    let framework = init(store, repo.clone(), index, ledger.clone());
    Inventory::new(framework, repo, ledger)
}

pub fn dynamo_store(client: aws_sdk_dynamodb::Client, tables: &Tables) -> DynamoStore {
    PersistedEventStore::new_snapshot_store(
        DynamoEventRepository::new(client).with_tables(&tables.event_log, &tables.event_snapshots),
        5,
    )
}

pub fn init_repo(client: aws_sdk_dynamodb::Client, tables: &Tables) -> ViewRepo {
    let repo: Box<dyn ViewRepository<View, Dropper>> =
        Box::new(DynamoViewRepository::new(&tables.droppers_view, client));
    Arc::new(repo)
}

pub fn mem_store() -> MemStore<Dropper> {
    MemStore::default()
}

pub fn init_mem_repo() -> ViewRepo {
    let repo: Box<dyn ViewRepository<View, Dropper>> =
        Box::new(MemViewRepository::<View, Dropper>::default());
    Arc::new(repo)
}
