// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Items without dedicated handling

use super::{templatize_id_everywhere, ItemConverter};
use crate::error::Result;
use crate::rest::PortalApi;
use crate::types::ItemTemplate;
use async_trait::async_trait;
use tracing::debug;

/// Carries item and data through; only the item's own id is templatized
pub struct GenericConverter;

#[async_trait]
impl ItemConverter for GenericConverter {
    async fn convert_to_template(&self, template: &mut ItemTemplate, _portal: &dyn PortalApi) -> Result<()> {
        let changed = templatize_id_everywhere(&mut template.data, &template.item_id)
            + templatize_id_everywhere(&mut template.item, &template.item_id);
        debug!(
            "Carried {} ({}) through unchanged apart from {} self reference(s)",
            template.item_id, template.item_type, changed
        );
        Ok(())
    }
}
