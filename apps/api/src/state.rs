use std::sync::Arc;

use crate::config::Config;
use crate::contacts::ContactService;
use crate::fish_client::CrmApi;
use crate::store::Store;
use crate::submissions::SubmissionWatcher;
use crate::sync::{RealTimeSync, SyncEngine};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub contacts: ContactService,
    pub engine: Arc<SyncEngine>,
    /// Background converter for raw form submissions.
    pub watcher: Arc<SubmissionWatcher>,
    /// Periodic bulk sync; reconfigured whenever the sync config is saved.
    pub realtime: Arc<RealTimeSync>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, crm: Arc<dyn CrmApi>) -> Self {
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            crm,
            config.bulk_batch_delay,
        ));
        let contacts = ContactService::new(store.clone(), engine.clone());
        let watcher = Arc::new(SubmissionWatcher::new(
            store.clone(),
            contacts.clone(),
            config.processor_id.clone(),
            config.watcher_rescan,
        ));
        let realtime = Arc::new(RealTimeSync::new(engine.clone()));

        Self {
            store,
            contacts,
            engine,
            watcher,
            realtime,
            config,
        }
    }
}
