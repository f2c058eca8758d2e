//! Built-in DIMSE service handlers.

pub mod echo;
pub mod find;
pub mod identifiers;
pub mod mpps;
pub mod retrieve;
pub mod store;

use crate::blob::BlobStore;
use crate::cache::QueryCache;
use crate::dispatch::HandlerRegistry;
use pacs_core::Dataset;
use pacs_dimse::CommandField;
use pacs_index::IndexDatabase;
use std::sync::Arc;

/// The C-FIND result cache: projected identifier data sets
/// per canonical query key.
pub type FindCache = QueryCache<Arc<Vec<Dataset>>>;

pub use retrieve::{StoreSender, StoreTarget};

/// Build the registry with every built-in service wired up.
pub fn default_registry(
    index: Arc<IndexDatabase>,
    blob: Arc<dyn BlobStore>,
    cache: Arc<FindCache>,
    store_sender: Arc<dyn StoreSender>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(CommandField::CEchoRq, Arc::new(echo::EchoHandler));
    registry.register(
        CommandField::CStoreRq,
        Arc::new(store::StoreHandler::new(
            Arc::clone(&blob),
            Arc::clone(&index),
            Arc::clone(&cache),
        )),
    );
    registry.register(
        CommandField::CFindRq,
        Arc::new(find::FindHandler::new(Arc::clone(&index), cache)),
    );

    let retrieve = Arc::new(retrieve::RetrieveHandler::new(
        Arc::clone(&index),
        store_sender,
    ));
    registry.register(CommandField::CGetRq, Arc::clone(&retrieve) as _);
    registry.register(CommandField::CMoveRq, retrieve);

    let mpps = Arc::new(mpps::MppsHandler::new(index));
    registry.register(CommandField::NCreateRq, Arc::clone(&mpps) as _);
    registry.register(CommandField::NSetRq, Arc::clone(&mpps) as _);
    registry.register(CommandField::NGetRq, mpps);

    registry
}
