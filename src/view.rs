use crate::auth::Session;
use crate::connectivity::Connectivity;
use crate::db::{LocalRecordStore, StoreError};
use crate::model::{LocalRow, RecordingStatus, RemoteEntry, UnifiedRow, ViewFilters};
use crate::remote::{IndexQuery, RemoteApi};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Merge local records with a (server-filtered) remote index result.
///
/// A local record that is `uploaded` and whose key the remote index already
/// lists is suppressed: the remote row is authoritative for that artifact.
/// Filters are applied to the local side only. Newest first.
pub fn merge_rows(
    local: Vec<LocalRow>,
    remote: Vec<RemoteEntry>,
    filters: &ViewFilters,
    device_id: &str,
) -> Vec<UnifiedRow> {
    let remote_keys: HashSet<&str> = remote.iter().map(|e| e.key.as_str()).collect();

    let mut rows: Vec<UnifiedRow> = local
        .into_iter()
        .filter(|r| {
            let superseded = r.status == RecordingStatus::Uploaded
                && r
                    .remote_key
                    .as_deref()
                    .is_some_and(|k| remote_keys.contains(k));
            !superseded
        })
        .filter(|r| filters.matches_local(r, device_id))
        .map(UnifiedRow::Local)
        .collect();
    rows.extend(remote.into_iter().map(UnifiedRow::Remote));

    rows.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    rows
}

#[derive(Clone)]
pub struct UnifiedViewBuilder {
    records: LocalRecordStore,
    remote: Arc<dyn RemoteApi>,
}

impl UnifiedViewBuilder {
    pub fn new(records: LocalRecordStore, remote: Arc<dyn RemoteApi>) -> Self {
        Self { records, remote }
    }

    /// Build the merged list. Offline, signed out, or a failing index query
    /// all degrade to local rows only.
    #[instrument(skip_all)]
    pub async fn build(
        &self,
        filters: &ViewFilters,
        device_id: &str,
        connectivity: Connectivity,
        session: Option<&Session>,
    ) -> Result<Vec<UnifiedRow>, StoreError> {
        let remote = match (connectivity.is_reachable(), session) {
            (true, Some(session)) => {
                let query = IndexQuery::from_filters(filters, device_id);
                match self.remote.list_index(session, &query).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        warn!(?err, "remote index unavailable; showing local recordings only");
                        Vec::new()
                    }
                }
            }
            _ => {
                debug!("remote index skipped");
                Vec::new()
            }
        };
        let local = self.records.list_rows().await?;
        Ok(merge_rows(local, remote, filters, device_id))
    }
}
