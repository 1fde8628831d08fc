//! Repository manager (§4.10): the in-memory registry of repositories,
//! backed by the embedded SQL store, plus lifecycle, checkout-task
//! tracking, and startup recovery. Grounded in
//! `original_source/daemon/repo-mgr.c`'s `seaf_repo_manager` responsibilities,
//! expressed with a `BTreeMap` behind a `RwLock` rather than a hand-rolled
//! ordered map (§9 REDESIGN FLAGS).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::bus::WatchHandle;
use crate::error::{EngineError, EngineResult};
use crate::gc_gate::GcGate;
use crate::repository::{Repository, RepositoryLock};
use crate::services::Services;
use crate::store_db::{RegistryRow, StoreDb};

/// State of one in-flight checkout, keyed by repo id (§4.10).
pub struct CheckoutTask {
    pub worktree_target: String,
    pub total_files: AtomicUsize,
    pub finished_files: AtomicUsize,
    pub success: AtomicBool,
    pub done: AtomicBool,
}

impl CheckoutTask {
    fn new(worktree_target: String, total_files: usize) -> Self {
        CheckoutTask {
            worktree_target,
            total_files: AtomicUsize::new(total_files),
            finished_files: AtomicUsize::new(0),
            success: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }
}

struct RepoState {
    repo: Repository,
    lock: Arc<RepositoryLock>,
    watch_handle: Option<WatchHandle>,
}

pub struct RepositoryManager {
    registry: RwLock<BTreeMap<String, RepoState>>,
    store: StoreDb,
    services: Services,
    gc_gate: GcGate,
    checkout_tasks: Mutex<BTreeMap<String, Arc<CheckoutTask>>>,
}

impl RepositoryManager {
    pub fn new(services: Services, store: StoreDb) -> Self {
        RepositoryManager {
            registry: RwLock::new(BTreeMap::new()),
            store,
            services,
            gc_gate: GcGate::new(),
            checkout_tasks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn gc_gate(&self) -> &GcGate {
        &self.gc_gate
    }

    /// Creates a brand-new repository and persists its registry row.
    pub fn create(&self, id: &str, name: &str) -> EngineResult<()> {
        if self.store.get_repo(id).map_err(store_err)?.is_some() {
            return Err(EngineError::AlreadyExists);
        }
        let repo = Repository::new(id, name);
        self.persist_registry_row(&repo, None)?;
        self.add_in_memory(repo);
        Ok(())
    }

    /// Registers an already-persisted repository (e.g. after a clone) in
    /// the in-memory map, loading its registry row from the store.
    pub fn add(&self, id: &str) -> EngineResult<()> {
        let row = self
            .store
            .get_repo(id)
            .map_err(store_err)?
            .ok_or(EngineError::NotFound)?;
        let repo = repo_from_row(&row);
        self.add_in_memory(repo);
        if let Some(worktree) = row.worktree {
            self.services.message_bus.publish("repo.setwktree", &worktree);
        }
        Ok(())
    }

    fn add_in_memory(&self, repo: Repository) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.insert(
            repo.id.clone(),
            RepoState {
                repo,
                lock: Arc::new(RepositoryLock::new()),
                watch_handle: None,
            },
        );
    }

    fn persist_registry_row(&self, repo: &Repository, worktree: Option<&str>) -> EngineResult<()> {
        self.store
            .insert_repo(&RegistryRow {
                id: repo.id.clone(),
                name: repo.name.clone(),
                description: repo.description.clone(),
                enc_version: repo.enc_version.map(|v| v.as_u32()),
                magic: repo.magic.clone(),
                kdf_iterations: repo.kdf_iterations,
                worktree: worktree.map(str::to_string),
            })
            .map_err(store_err)
    }

    /// Snapshot of every known, non-tombstoned repository id, taken under
    /// the registry reader lock (§5).
    pub fn list_ids(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn with_repo<T>(&self, id: &str, f: impl FnOnce(&Repository) -> T) -> EngineResult<T> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let state = registry.get(id).ok_or(EngineError::NotFound)?;
        Ok(f(&state.repo))
    }

    /// Returns the per-repo destructive-operation lock (§5 `Repo.lock`).
    pub fn repo_lock(&self, id: &str) -> EngineResult<Arc<RepositoryLock>> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry
            .get(id)
            .map(|s| Arc::clone(&s.lock))
            .ok_or(EngineError::NotFound)
    }

    /// Records a tombstone and hides the repository from lookups; the
    /// registry row itself is removed later by `purge`.
    pub fn mark_deleted(&self, id: &str) -> EngineResult<()> {
        self.store.mark_deleted(id).map_err(store_err)?;
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = registry.remove(id) {
            if let Some(handle) = state.watch_handle {
                self.services.watcher.unsubscribe(handle);
            }
            if let Some(worktree) = self.store.get_repo(id).map_err(store_err)?.and_then(|r| r.worktree) {
                self.services.message_bus.publish("repo.unsetwktree", &worktree);
            }
        }
        Ok(())
    }

    /// Runs at startup for every tombstoned repository: deletes branches,
    /// then the store rows, with the registry row removed last (the
    /// commit point, §7), so a crash mid-purge is safely retried.
    pub fn purge_tombstones(&self) -> EngineResult<()> {
        for id in self.store.list_tombstones().map_err(store_err)? {
            self.services.branch_store.remove_all(&id).map_err(EngineError::Backend)?;
            self.store.purge(&id).map_err(store_err)?;
        }
        Ok(())
    }

    /// Unique-prefix lookup (§9 open question): ambiguous prefixes are an
    /// error, never "closest match".
    pub fn find_by_prefix(&self, prefix: &str) -> EngineResult<String> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut matches = registry.keys().filter(|id| id.starts_with(prefix));
        let first = matches.next().ok_or(EngineError::NotFound)?;
        if matches.next().is_some() {
            return Err(EngineError::Ambiguous);
        }
        Ok(first.clone())
    }

    /// Property setter (§4.10, §6): mediates `auto-sync` (subscribe/
    /// unsubscribe the watcher) and `relay-id` (format validation) before
    /// persisting; other keys persist as-is.
    pub fn set_property(&self, id: &str, key: &str, value: &str) -> EngineResult<()> {
        if key == "relay-id" {
            let valid = value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(EngineError::Internal("invalid relay id".to_string()));
            }
        }
        if key == "auto-sync" {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            let state = registry.get_mut(id).ok_or(EngineError::NotFound)?;
            let worktree = self
                .store
                .get_property(id, "worktree")
                .map_err(store_err)?
                .unwrap_or_default();
            match value {
                "true" => {
                    if state.watch_handle.is_none() {
                        state.watch_handle = Some(self.services.watcher.subscribe(&worktree));
                    }
                }
                _ => {
                    if let Some(handle) = state.watch_handle.take() {
                        self.services.watcher.unsubscribe(handle);
                    }
                }
            }
        }
        self.store.set_property(id, key, value).map_err(store_err)
    }

    pub fn get_property(&self, id: &str, key: &str) -> EngineResult<Option<String>> {
        self.store.get_property(id, key).map_err(store_err)
    }

    /// Starts a checkout task on the job manager's thread pool, recording
    /// its progress in the checkout task table (§4.10).
    pub fn start_checkout(
        &self,
        id: &str,
        worktree_target: &str,
        total_files: usize,
        work: impl FnOnce(&CheckoutTask, &AtomicBool) + Send + 'static,
    ) -> Arc<CheckoutTask> {
        let task = Arc::new(CheckoutTask::new(worktree_target.to_string(), total_files));
        self.checkout_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), Arc::clone(&task));
        let task_for_job = Arc::clone(&task);
        self.services.jobs.spawn(move |cancel| {
            work(&task_for_job, cancel);
            task_for_job.done.store(true, Ordering::Relaxed);
        });
        task
    }

    pub fn checkout_task(&self, id: &str) -> Option<Arc<CheckoutTask>> {
        self.checkout_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Startup recovery (§4.10): repositories with `in_merge=true` get a
    /// merge-recovery job scheduled under their lock; the caller supplies
    /// `recover` since the actual merge algorithm lives above this module.
    pub fn recover_unfinished_merges(&self, recover: impl Fn(&str) + Send + Sync + 'static) -> EngineResult<()> {
        let recover = Arc::new(recover);
        for id in self.services_store_repos_in_merge()? {
            let lock = self.repo_lock(&id)?;
            let recover = Arc::clone(&recover);
            let id_for_job = id.clone();
            self.services.jobs.spawn(move |_cancel| {
                lock.with_lock(|| recover(&id_for_job));
            });
        }
        Ok(())
    }

    fn services_store_repos_in_merge(&self) -> EngineResult<Vec<String>> {
        self.store.repos_in_merge().map_err(store_err)
    }
}

fn repo_from_row(row: &RegistryRow) -> Repository {
    Repository {
        id: row.id.clone(),
        name: row.name.clone(),
        description: row.description.clone(),
        enc_version: row
            .enc_version
            .and_then(|v| crate::crypt::EncVersion::from_u32(v).ok()),
        magic: row.magic.clone(),
        kdf_iterations: row.kdf_iterations,
    }
}

fn store_err(e: crate::store_db::StoreDbError) -> EngineError {
    EngineError::Internal(e.to_string())
}
