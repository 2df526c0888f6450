mod entry;
mod helpers;
mod profile;
mod quota;
mod summary;
mod tag;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::remote::HttpRemoteStore;
use fitledger_core::clock::SystemClock;
use fitledger_core::ledger::LedgerStore;
use fitledger_core::storage::BlobStore;
use fitledger_core::sync::{RetryPolicy, SyncCoalescer, SyncConfig, WriteOutcome};

pub(crate) use entry::{EntryArgs, cmd_edit, cmd_log, cmd_remove};
pub(crate) use profile::{
    cmd_login, cmd_logout, cmd_mood, cmd_profile_set, cmd_profile_show, cmd_sync,
};
pub(crate) use quota::{cmd_quota_show, cmd_quota_use};
pub(crate) use summary::{cmd_export, cmd_summary, cmd_year};
pub(crate) use tag::{cmd_tag_add, cmd_tag_list, cmd_tag_remove};

/// The ledger plus, when a user is signed in and a remote is configured,
/// the coalescer that mirrors profile changes to it.
pub(crate) struct App {
    pub ledger: LedgerStore,
    sync: Option<SyncCoalescer>,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self> {
        let storage = BlobStore::open(&config.store_path)?;
        let mut ledger = LedgerStore::open(Box::new(storage), Arc::new(SystemClock))?;

        let sync = match (config.user_id()?, config.remote_url.as_deref()) {
            (Some(user_id), Some(url)) => {
                let remote = HttpRemoteStore::new(url, config.remote_api_key.clone())?;
                let sync = SyncCoalescer::new(
                    Arc::new(remote),
                    SyncConfig::default(),
                    RetryPolicy::default(),
                )?;
                sync.begin_session(&user_id).await;
                ledger.subscribe(Arc::new(sync.clone()));
                Some(sync)
            }
            _ => None,
        };

        let report = ledger.run_maintenance();
        debug!(?report, "maintenance on open");

        Ok(Self { ledger, sync })
    }

    pub fn sync(&self) -> Option<&SyncCoalescer> {
        self.sync.as_ref()
    }

    /// Queue every sync field, so anything the remote lacks gets written.
    pub fn queue_full_profile(&self) {
        if let Some(ref sync) = self.sync {
            sync.notify(&self.ledger.sync_fields());
        }
    }

    /// Surface storage warnings and push pending changes before exit.
    pub async fn finish(self) -> Option<WriteOutcome> {
        if let Some(warning) = self.ledger.storage_warning() {
            eprintln!("Warning: {warning}. Changes are kept in memory only.");
        }
        let outcome = match self.sync {
            Some(sync) => sync.flush().await,
            None => None,
        };
        if let Some(WriteOutcome::Abandoned { ref error, .. }) = outcome {
            eprintln!("Warning: could not sync profile ({error}). Run `fitledger sync` to retry.");
        }
        outcome
    }
}
