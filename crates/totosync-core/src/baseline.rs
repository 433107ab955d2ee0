// ── REST-backed baseline fetchers ──
//
// Adapters from the backend's REST endpoints to `BaselineFetcher`, so
// polled snapshots arrive as the same updates push events produce.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use totosync_api::BaselineClient;

use crate::config::EntitySpec;
use crate::error::CoreError;
use crate::merge::{MissingEntities, Update, keyed_patches};
use crate::model::SlotId;
use crate::poll::BaselineFetcher;

/// Which snapshot a [`RestBaseline`] fetches.
#[derive(Debug, Clone, PartialEq)]
pub enum RestResource {
    /// `GET /api/v1/system/info` into the system slot.
    System,
    /// `GET /api/v1/devices/scan/status` into the scan slot.
    Scan,
    /// `GET /api/v1/devices` field-merged into the entity map.
    Entities {
        spec: EntitySpec,
        missing: MissingEntities,
    },
}

/// A [`BaselineFetcher`] over one REST endpoint.
pub struct RestBaseline {
    client: Arc<BaselineClient>,
    resource: RestResource,
    name: String,
}

impl RestBaseline {
    pub fn new(client: Arc<BaselineClient>, resource: RestResource) -> Self {
        let name = match &resource {
            RestResource::System => "system".to_owned(),
            RestResource::Scan => "scan".to_owned(),
            RestResource::Entities { spec, .. } => spec.hello_list_key(),
        };
        Self {
            client,
            resource,
            name,
        }
    }

    pub fn system(client: Arc<BaselineClient>) -> Self {
        Self::new(client, RestResource::System)
    }

    pub fn scan(client: Arc<BaselineClient>) -> Self {
        Self::new(client, RestResource::Scan)
    }

    /// Entity list fetcher. Entities absent from the list are retained.
    pub fn entities(client: Arc<BaselineClient>, spec: EntitySpec) -> Self {
        Self::new(
            client,
            RestResource::Entities {
                spec,
                missing: MissingEntities::Retain,
            },
        )
    }

    /// Set how entities missing from the fetched list are treated.
    /// Has no effect on slot fetchers.
    pub fn with_missing(mut self, policy: MissingEntities) -> Self {
        if let RestResource::Entities { missing, .. } = &mut self.resource {
            *missing = policy;
        }
        self
    }

    pub fn resource(&self) -> &RestResource {
        &self.resource
    }
}

impl BaselineFetcher for RestBaseline {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Update>, CoreError>> {
        async move {
            let update = match &self.resource {
                RestResource::System => Update::ReplaceSlot {
                    slot: SlotId::System,
                    value: self.client.system_info().await?,
                },
                RestResource::Scan => Update::ReplaceSlot {
                    slot: SlotId::Scan,
                    value: self.client.scan_status().await?,
                },
                RestResource::Entities { spec, missing } => {
                    let page = self.client.devices().await?;
                    Update::MergeEntities {
                        records: keyed_patches(&page.devices, &spec.key_field),
                        missing: missing.clone(),
                    }
                }
            };
            Ok(vec![update])
        }
        .boxed()
    }
}
