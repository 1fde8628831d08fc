//! `Services` (§4.14, §9 REDESIGN FLAGS): the external collaborators the
//! repository manager depends on, bundled into one value constructed once
//! at startup and passed by reference — replacing the source's global
//! session singleton.

use std::sync::Arc;

use crate::backend::{BranchStore, FileStore, ObjectStore};
use crate::bus::{MessageBus, Watcher};
use crate::job::JobManager;
use crate::settings::UserSettings;

pub struct Services {
    pub object_store: Arc<dyn ObjectStore>,
    pub branch_store: Arc<dyn BranchStore>,
    pub file_store: Arc<dyn FileStore>,
    pub message_bus: Arc<MessageBus>,
    pub watcher: Arc<dyn Watcher>,
    pub jobs: Arc<JobManager>,
    pub settings: UserSettings,
}

impl Services {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        branch_store: Arc<dyn BranchStore>,
        file_store: Arc<dyn FileStore>,
        watcher: Arc<dyn Watcher>,
        job_capacity: usize,
        settings: UserSettings,
    ) -> Self {
        Services {
            object_store,
            branch_store,
            file_store,
            message_bus: Arc::new(MessageBus::new()),
            watcher,
            jobs: Arc::new(JobManager::new(job_capacity)),
            settings,
        }
    }
}
