// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Deploying solutions into a destination portal
//!
//! Templates are created level by level in dependency order. Every created
//! item registers its new id in the [`TemplateDictionary`] so later items
//! resolve their tokens against it. When anything fails, the items created
//! by the run are deleted again in reverse order.

use crate::converters::{converter_for, Deployed, ItemConverter};
use crate::error::{Result, SolutionError};
use crate::graph::DependencyGraph;
use crate::rest::PortalApi;
use crate::templatize::{replace_in_template, unresolved_tokens, TemplateDictionary};
use crate::types::{CreatedItem, ItemProgressStatus, ItemTemplate, ProgressCallback, ProgressEvent, Solution};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Folder title used when neither the options nor the solution name one
pub const DEFAULT_FOLDER_TITLE: &str = "Solution";

/// How a solution is deployed
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Existing folder to deploy into; a new one is created otherwise
    pub folder_id: Option<String>,
    /// Title of the new folder; defaults to the solution title, then
    /// [`DEFAULT_FOLDER_TITLE`]
    pub folder_title: Option<String>,
    /// Dictionary entries applied on top of the seeded values
    pub overrides: TemplateDictionary,
    /// Delete created items when the deployment fails
    pub rollback: bool,
    /// Create a `Solution` item describing the deployment
    pub create_solution_item: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            folder_id: None,
            folder_title: None,
            overrides: TemplateDictionary::new(),
            rollback: true,
            create_solution_item: false,
        }
    }
}

/// Outcome of a successful deployment
#[derive(Debug, Clone)]
pub struct DeployReport {
    /// Folder holding the new items
    pub folder_id: String,
    /// Deployed solution item, when requested
    pub solution_item_id: Option<String>,
    /// Every template, in deployment order
    pub items: Vec<CreatedItem>,
    /// Final dictionary
    pub dictionary: TemplateDictionary,
}

impl DeployReport {
    /// Tokens the final dictionary cannot resolve, per source item
    #[must_use]
    pub fn unresolved(&self, solution: &Solution) -> Vec<(String, Vec<String>)> {
        solution
            .templates
            .iter()
            .filter_map(|template| {
                let resolved = resolve(template, &self.dictionary);
                let mut tokens = unresolved_tokens(&resolved.item);
                tokens.extend(unresolved_tokens(&resolved.data));
                (!tokens.is_empty()).then(|| (template.item_id.clone(), tokens.into_iter().collect()))
            })
            .collect()
    }
}

// =========================================================================
// Progress
// =========================================================================

/// Turns per-item status changes into progress events with an overall
/// percentage weighted by each template's cost factor
pub struct ProgressTracker<'a> {
    callback: Option<ProgressCallback<'a>>,
    total: u64,
    done: AtomicU64,
}

impl<'a> ProgressTracker<'a> {
    /// Track the deployment of `templates`
    #[must_use]
    pub fn new(callback: Option<ProgressCallback<'a>>, templates: &[ItemTemplate]) -> Self {
        let total = templates
            .iter()
            .map(|t| u64::from(t.estimated_deployment_cost_factor.max(1)))
            .fold(0, u64::saturating_add)
            .max(1);
        Self {
            callback,
            total,
            done: AtomicU64::new(0),
        }
    }

    /// No callback, nothing reported
    #[must_use]
    pub fn silent() -> Self {
        Self::new(None, &[])
    }

    /// Overall completion, 0-100
    #[must_use]
    pub fn percent_done(&self) -> u8 {
        let done = self.done.load(Ordering::SeqCst).min(self.total);
        u8::try_from(done.saturating_mul(100) / self.total).unwrap_or(100)
    }

    fn report(&self, item_id: &str, item_type: &str, status: ItemProgressStatus) {
        debug!("{} ({}): {:?}", item_id, item_type, status);
        if let Some(callback) = self.callback {
            callback(&ProgressEvent {
                item_id: item_id.to_string(),
                item_type: item_type.to_string(),
                status,
                percent_done: self.percent_done(),
            });
        }
    }

    fn complete(&self, template: &ItemTemplate) {
        self.done
            .fetch_add(u64::from(template.estimated_deployment_cost_factor.max(1)), Ordering::SeqCst);
    }
}

// =========================================================================
// Items
// =========================================================================

/// Clone `template` with item and data detemplatized
#[must_use]
pub fn resolve(template: &ItemTemplate, dictionary: &TemplateDictionary) -> ItemTemplate {
    let mut resolved = template.clone();
    resolved.item = replace_in_template(&template.item, dictionary);
    resolved.data = replace_in_template(&template.data, dictionary);
    resolved
}

/// Seed a dictionary with the destination portal, organization, user and
/// folder
pub async fn seed_dictionary(portal: &dyn PortalApi, folder_id: &str) -> Result<TemplateDictionary> {
    let mut organization = portal.portal_self().await?;
    let user = organization
        .as_object_mut()
        .and_then(|map| map.remove("user"))
        .unwrap_or_else(|| json!({}));

    let mut dictionary = TemplateDictionary::new();
    dictionary.set("portalBaseUrl", Value::String(portal.portal_url().to_string()));
    dictionary.set("organization", organization);
    if dictionary.get("organization.portalBaseUrl").is_none() {
        dictionary.set("organization.portalBaseUrl", Value::String(portal.portal_url().to_string()));
    }
    dictionary.set("user", user);
    dictionary.set("folderId", Value::String(folder_id.to_string()));
    Ok(dictionary)
}

/// Second pass once the item exists: resolve self references, push changes,
/// register the item URL and run the converter's fine tuning
async fn finish_item(
    template: &ItemTemplate,
    first: &ItemTemplate,
    deployed: &Deployed,
    converter: &dyn ItemConverter,
    dictionary: &mut TemplateDictionary,
    portal: &dyn PortalApi,
) -> Result<Vec<String>> {
    let second = resolve(template, dictionary);

    if deployed.created {
        let data_changed = converter.carries_data() && second.data != first.data;
        if second.item != first.item || data_changed {
            debug!("Updating {} with resolved self references", deployed.item_id);
            portal
                .update_item(&deployed.item_id, &second.item, data_changed.then_some(&second.data))
                .await?;
        }
    }

    let url_path = format!("{}.url", template.item_id);
    if dictionary.get(&url_path).is_none() {
        if let Some(url) = second.item.get("url").and_then(Value::as_str) {
            if unresolved_tokens(&Value::String(url.to_string())).is_empty() {
                dictionary.set(&url_path, Value::String(url.to_string()));
            }
        }
    }

    let mut leftover = unresolved_tokens(&second.item);
    leftover.extend(unresolved_tokens(&second.data));
    if !leftover.is_empty() {
        warn!(
            "{} still has unresolved tokens: {}",
            template.item_id,
            leftover.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    converter.fine_tune(&second, deployed, dictionary, portal).await
}

async fn delete_quietly(portal: &dyn PortalApi, item_id: &str) {
    if let Err(e) = portal.delete_item(item_id).await {
        warn!("Could not delete {}: {}", item_id, e);
    }
}

async fn delete_folder_quietly(portal: &dyn PortalApi, folder_id: &str) {
    if let Err(e) = portal.delete_folder(folder_id).await {
        warn!("Could not delete folder {}: {}", folder_id, e);
    }
}

/// Create one item from its template.
///
/// Tokens are resolved against `dictionary`, the item is created (or, for
/// reference-only types, reused) and its new id registered, then the
/// converter's fine tuning runs. When fine tuning fails the new item is
/// deleted before the error is returned.
pub async fn create_item_from_template(
    template: &ItemTemplate,
    dictionary: &mut TemplateDictionary,
    portal: &dyn PortalApi,
    progress: &ProgressTracker<'_>,
) -> Result<CreatedItem> {
    let ids = [template.item_id.as_str()];
    progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Started);
    let converter = converter_for(&template.kind());

    let first = resolve(template, dictionary);
    let folder_id = dictionary.get_str("folderId").map(str::to_string);
    let deployed = match converter.create_item(&first, folder_id.as_deref(), portal).await {
        Ok(deployed) => deployed,
        Err(e) => {
            progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Failed);
            return Err(e.with_ids(&ids));
        }
    };
    converter.register(&first, &deployed, dictionary);
    progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Created);

    match finish_item(template, &first, &deployed, converter, dictionary, portal).await {
        Ok(extra_item_ids) => {
            progress.complete(template);
            progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Finished);
            info!("Deployed {} as {}", template.item_id, deployed.item_id);
            Ok(CreatedItem {
                source_id: template.item_id.clone(),
                item_id: deployed.item_id,
                item_type: template.item_type.clone(),
                created: deployed.created,
                extra_item_ids,
            })
        }
        Err(e) => {
            if deployed.created {
                delete_quietly(portal, &deployed.item_id).await;
            }
            progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Failed);
            Err(e.with_ids(&[template.item_id.as_str(), deployed.item_id.as_str()]))
        }
    }
}

// =========================================================================
// Solutions
// =========================================================================

async fn deploy_one(
    template: &ItemTemplate,
    mut local: TemplateDictionary,
    portal: &dyn PortalApi,
    progress: &ProgressTracker<'_>,
) -> (TemplateDictionary, Result<CreatedItem>) {
    if let Some(existing) = local.item_id(&template.item_id).map(str::to_string) {
        let deployed = Deployed {
            item_id: existing,
            created: false,
        };
        converter_for(&template.kind()).register(template, &deployed, &mut local);
        progress.complete(template);
        progress.report(&template.item_id, &template.item_type, ItemProgressStatus::Ignored);
        let item = CreatedItem {
            source_id: template.item_id.clone(),
            item_id: deployed.item_id,
            item_type: template.item_type.clone(),
            created: false,
            extra_item_ids: Vec::new(),
        };
        return (local, Ok(item));
    }
    let result = create_item_from_template(template, &mut local, portal, progress).await;
    (local, result)
}

async fn rollback(created: &[CreatedItem], portal: &dyn PortalApi, progress: &ProgressTracker<'_>) {
    warn!("Rolling back {} item(s)", created.len());
    for item in created.iter().rev() {
        for extra in item.extra_item_ids.iter().rev() {
            delete_quietly(portal, extra).await;
        }
        if item.created {
            delete_quietly(portal, &item.item_id).await;
            progress.report(&item.source_id, &item.item_type, ItemProgressStatus::Cancelled);
        }
    }
}

async fn relate_items(
    solution: &Solution,
    created: &[CreatedItem],
    dictionary: &TemplateDictionary,
    portal: &dyn PortalApi,
) -> Result<usize> {
    let was_created = |source: &str| created.iter().any(|c| c.source_id == source && c.created);
    let mut count = 0;
    for template in &solution.templates {
        let Some(origin) = dictionary.item_id(&template.item_id) else {
            continue;
        };
        for related in &template.related_items {
            // Recreated by the converter's fine tuning
            if related.relationship_type == "WMA2Code" {
                continue;
            }
            for destination_source in &related.related_item_ids {
                let Some(destination) = dictionary.item_id(destination_source) else {
                    continue;
                };
                // Relationships between reused items already exist
                if !was_created(&template.item_id) && !was_created(destination_source) {
                    continue;
                }
                portal
                    .add_relationship(origin, destination, &related.relationship_type)
                    .await
                    .map_err(|e| e.with_ids(&[template.item_id.as_str(), destination_source.as_str()]))?;
                count += 1;
            }
        }
    }
    Ok(count)
}

async fn deploy_levels(
    solution: &Solution,
    levels: &[Vec<String>],
    dictionary: &mut TemplateDictionary,
    portal: &dyn PortalApi,
    progress: &ProgressTracker<'_>,
    created: &mut Vec<CreatedItem>,
) -> Result<()> {
    for (depth, level) in levels.iter().enumerate() {
        debug!("Deploying level {} ({} item(s))", depth, level.len());
        let snapshot = dictionary.clone();
        let tasks = level
            .iter()
            .filter_map(|id| solution.template_by_id(id))
            .map(|template| deploy_one(template, snapshot.clone(), portal, progress));

        let mut failure: Option<SolutionError> = None;
        for (template_id, (local, result)) in level.iter().zip(join_all(tasks).await) {
            match result {
                Ok(item) => {
                    dictionary.merge(&local);
                    created.push(item);
                }
                Err(e) => {
                    warn!("Deploying {} failed: {}", template_id, e);
                    if failure.is_none() {
                        failure = Some(SolutionError::Deploy {
                            item_id: template_id.clone(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
    }

    let related = relate_items(solution, created, dictionary, portal).await?;
    debug!("Recreated {} relationship(s)", related);
    Ok(())
}

/// Deploy every template of `solution` into `portal`.
///
/// Items whose source id is already mapped in the dictionary (through
/// `options.overrides`) are skipped and reported as ignored. On failure
/// the created items, the solution item and a newly created folder are
/// removed unless `options.rollback` is off.
pub async fn deploy_solution(
    solution: &Solution,
    portal: &dyn PortalApi,
    options: &DeployOptions,
    progress: Option<ProgressCallback<'_>>,
) -> Result<DeployReport> {
    let levels = DependencyGraph::from_templates(&solution.templates).deploy_levels()?;
    for id in levels.iter().flatten() {
        if !solution.has_template(id) {
            return Err(SolutionError::TemplateNotFound(id.clone()));
        }
    }

    let (folder_id, created_folder) = match &options.folder_id {
        Some(id) => (id.clone(), false),
        None => {
            let title = options
                .folder_title
                .as_deref()
                .unwrap_or(&solution.metadata.title)
                .trim();
            let title = if title.is_empty() { DEFAULT_FOLDER_TITLE } else { title };
            (portal.create_folder(title).await?, true)
        }
    };
    info!("Deploying {} template(s) into folder {}", solution.templates.len(), folder_id);

    let mut dictionary = match seed_dictionary(portal, &folder_id).await {
        Ok(d) => d,
        Err(e) => {
            if created_folder {
                delete_folder_quietly(portal, &folder_id).await;
            }
            return Err(e);
        }
    };
    dictionary.merge(&options.overrides);

    let mut solution_item_id = None;
    if options.create_solution_item {
        let item = json!({
            "type": "Solution",
            "title": solution.metadata.title,
            "typeKeywords": ["Solution", "Deployed"],
        });
        let id = match portal.add_item(&item, None, Some(&folder_id)).await {
            Ok(id) => id,
            Err(e) => {
                if created_folder && options.rollback {
                    delete_folder_quietly(portal, &folder_id).await;
                }
                return Err(e);
            }
        };
        dictionary.set("solutionItemId", Value::String(id.clone()));
        solution_item_id = Some(id);
    }

    let tracker = ProgressTracker::new(progress, &solution.templates);
    let mut created = Vec::new();
    let outcome = deploy_levels(solution, &levels, &mut dictionary, portal, &tracker, &mut created).await;

    let outcome = match (outcome, &solution_item_id) {
        (Ok(()), Some(id)) => {
            let data = json!({"metadata": solution.metadata, "items": created});
            portal
                .update_item(id, &json!({}), Some(&data))
                .await
                .map_err(|e| e.with_ids(&[id.as_str()]))
        }
        (outcome, _) => outcome,
    };

    if let Err(e) = outcome {
        if options.rollback {
            rollback(&created, portal, &tracker).await;
            if let Some(id) = &solution_item_id {
                delete_quietly(portal, id).await;
            }
            if created_folder {
                delete_folder_quietly(portal, &folder_id).await;
            }
        }
        return Err(e);
    }

    info!("Deployed {} item(s)", created.iter().filter(|c| c.created).count());
    Ok(DeployReport {
        folder_id,
        solution_item_id,
        items: created,
        dictionary,
    })
}
