//! Optimistic local writes issued by the host application
//!
//! Every operation writes the row and its outbox entry in one transaction.
//! Rows stay pending until the next sync pushes them.

use super::{LocalStore, Query};
use crate::models::{
    Collection, Geofence, GeofenceTrigger, List, ListItem, ListStatus, ListType, LocalId,
    LocationHistory, Member, RecordMeta, ServerId,
};
use crate::util::normalize_text_option;
use crate::{Error, Result};

/// Editable fields of a list item. `None` leaves a field unchanged; an empty
/// string clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub quantity: Option<String>,
    pub note: Option<String>,
}

/// A geofence to create. Unset users default the way the app does: the
/// creator is notified and nobody in particular is watched.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeofence {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Radius in meters
    pub radius: f64,
    pub trigger_on: GeofenceTrigger,
    pub watch_user_id: Option<ServerId>,
    pub notify_user_id: Option<ServerId>,
}

/// Editable fields of a geofence. `None` leaves a field unchanged; the
/// inner `None` of a user field clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeofencePatch {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<f64>,
    pub trigger_on: Option<GeofenceTrigger>,
    pub watch_user_id: Option<Option<ServerId>>,
    pub notify_user_id: Option<Option<ServerId>>,
    pub enabled: Option<bool>,
}

/// One position reported by this device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    /// Percent, 0-100
    pub battery_level: Option<f64>,
    /// When the fix was taken (Unix ms)
    pub timestamp: i64,
}

fn check_position(lat: f64, lng: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(Error::InvalidInput(format!(
            "coordinates out of range: {lat}, {lng}"
        )));
    }
    Ok(())
}

fn check_radius(radius: f64) -> Result<()> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "geofence radius must be positive, got {radius}"
        )));
    }
    Ok(())
}

fn required_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{what} name cannot be empty")));
    }
    Ok(name.to_string())
}

impl LocalStore {
    /// Create a list in `family_id`.
    pub async fn create_list(
        &self,
        family_id: &ServerId,
        name: &str,
        list_type: ListType,
        created_by: Option<&ServerId>,
    ) -> Result<List> {
        let name = required_name(name, "List")?;
        let list = self
            .write(|txn| {
                let list = List::new(
                    family_id.clone(),
                    name,
                    list_type,
                    created_by.cloned(),
                    txn.now(),
                );
                txn.insert(list)
            })
            .await?;
        tracing::debug!("Created list {} ({})", list.meta.server_id, list.name);
        Ok(list)
    }

    pub async fn rename_list(&self, local_id: &LocalId, name: &str) -> Result<List> {
        let name = required_name(name, "List")?;
        self.write(|txn| txn.update(local_id, |list: &mut List| list.name = name))
            .await
    }

    pub async fn set_list_status(&self, local_id: &LocalId, status: ListStatus) -> Result<List> {
        self.write(|txn| txn.update(local_id, |list: &mut List| list.status = status))
            .await
    }

    /// Delete a list and, with it, its items.
    pub async fn delete_list(&self, local_id: &LocalId) -> Result<()> {
        self.write(|txn| txn.delete(Collection::Lists, local_id))
            .await
    }

    /// Append an item to a live list. New items sort after the list's
    /// unchecked items.
    pub async fn add_item(
        &self,
        list_local_id: &LocalId,
        name: &str,
        quantity: Option<String>,
        note: Option<String>,
        created_by: Option<&ServerId>,
    ) -> Result<ListItem> {
        let name = required_name(name, "Item")?;
        self.write(|txn| {
            let list = txn
                .get::<List>(list_local_id)?
                .filter(|list| !list.meta.is_deleted)
                .ok_or_else(|| {
                    Error::ReferentialIntegrity(format!(
                        "cannot add an item to missing list {list_local_id}"
                    ))
                })?;

            let unchecked = txn
                .scan(
                    Collection::ListItems,
                    Some(list.meta.server_id.as_str()),
                    false,
                )?
                .iter()
                .filter(|row| row["is_checked"] != serde_json::Value::Bool(true))
                .count();

            let mut item = ListItem::new(list.meta.server_id, name, created_by.cloned(), txn.now());
            item.quantity = normalize_text_option(quantity);
            item.note = normalize_text_option(note);
            item.sort_order = i64::try_from(unchecked).unwrap_or(i64::MAX);
            txn.insert(item)
        })
        .await
    }

    /// Flip an item's checked state, recording who checked it.
    pub async fn toggle_item(
        &self,
        local_id: &LocalId,
        by: Option<&ServerId>,
    ) -> Result<ListItem> {
        self.write(|txn| {
            txn.update(local_id, |item: &mut ListItem| {
                item.is_checked = !item.is_checked;
                item.checked_by = if item.is_checked { by.cloned() } else { None };
            })
        })
        .await
    }

    pub async fn update_item(&self, local_id: &LocalId, patch: ItemPatch) -> Result<ListItem> {
        let name = patch
            .name
            .as_deref()
            .map(|name| required_name(name, "Item"))
            .transpose()?;
        self.write(|txn| {
            txn.update(local_id, |item: &mut ListItem| {
                if let Some(name) = name {
                    item.name = name;
                }
                if patch.quantity.is_some() {
                    item.quantity = normalize_text_option(patch.quantity);
                }
                if patch.note.is_some() {
                    item.note = normalize_text_option(patch.note);
                }
            })
        })
        .await
    }

    pub async fn delete_item(&self, local_id: &LocalId) -> Result<()> {
        self.write(|txn| txn.delete(Collection::ListItems, local_id))
            .await
    }

    pub async fn toggle_geofence(&self, local_id: &LocalId) -> Result<Geofence> {
        self.write(|txn| {
            txn.update(local_id, |geofence: &mut Geofence| {
                geofence.enabled = !geofence.enabled;
            })
        })
        .await
    }

    /// Create an enabled geofence in `family_id`.
    pub async fn create_geofence(
        &self,
        family_id: &ServerId,
        input: NewGeofence,
        created_by: Option<&ServerId>,
    ) -> Result<Geofence> {
        let name = required_name(&input.name, "Geofence")?;
        check_position(input.lat, input.lng)?;
        check_radius(input.radius)?;
        let geofence = self
            .write(|txn| {
                let geofence = Geofence {
                    meta: RecordMeta::pending(txn.now()),
                    family_id: family_id.clone(),
                    name,
                    lat: input.lat,
                    lng: input.lng,
                    radius: input.radius,
                    trigger_on: input.trigger_on,
                    watch_user_id: input.watch_user_id,
                    notify_user_id: input.notify_user_id.or_else(|| created_by.cloned()),
                    enabled: true,
                };
                txn.insert(geofence)
            })
            .await?;
        tracing::debug!(
            "Created geofence {} ({})",
            geofence.meta.server_id,
            geofence.name
        );
        Ok(geofence)
    }

    pub async fn update_geofence(
        &self,
        local_id: &LocalId,
        patch: GeofencePatch,
    ) -> Result<Geofence> {
        let name = patch
            .name
            .as_deref()
            .map(|name| required_name(name, "Geofence"))
            .transpose()?;
        if let Some(radius) = patch.radius {
            check_radius(radius)?;
        }
        self.write(|txn| {
            let current = txn.require::<Geofence>(local_id)?;
            check_position(
                patch.lat.unwrap_or(current.lat),
                patch.lng.unwrap_or(current.lng),
            )?;
            txn.update(local_id, |geofence: &mut Geofence| {
                if let Some(name) = name {
                    geofence.name = name;
                }
                if let Some(lat) = patch.lat {
                    geofence.lat = lat;
                }
                if let Some(lng) = patch.lng {
                    geofence.lng = lng;
                }
                if let Some(radius) = patch.radius {
                    geofence.radius = radius;
                }
                if let Some(trigger_on) = patch.trigger_on {
                    geofence.trigger_on = trigger_on;
                }
                if let Some(watch_user_id) = patch.watch_user_id {
                    geofence.watch_user_id = watch_user_id;
                }
                if let Some(notify_user_id) = patch.notify_user_id {
                    geofence.notify_user_id = notify_user_id;
                }
                if let Some(enabled) = patch.enabled {
                    geofence.enabled = enabled;
                }
            })
        })
        .await
    }

    pub async fn delete_geofence(&self, local_id: &LocalId) -> Result<()> {
        self.write(|txn| txn.delete(Collection::Geofences, local_id))
            .await
    }

    /// Append a location point for `user_id` and move the member's last
    /// known position to it, in one transaction.
    ///
    /// The member row is only touched when it is known locally and the fix
    /// is newer than its last known position.
    pub async fn record_location(
        &self,
        user_id: &ServerId,
        fix: LocationFix,
    ) -> Result<LocationHistory> {
        check_position(fix.lat, fix.lng)?;
        self.write(|txn| {
            let now = txn.now();
            let point = txn.insert(LocationHistory {
                meta: RecordMeta::pending(now),
                user_id: user_id.clone(),
                lat: fix.lat,
                lng: fix.lng,
                accuracy: fix.accuracy,
                battery_level: fix.battery_level,
                timestamp: fix.timestamp,
            })?;

            let member = txn
                .get_by_server_id::<Member>(user_id)?
                .filter(|member| !member.meta.is_deleted)
                .filter(|member| {
                    member
                        .last_location_at
                        .map_or(true, |last| last <= fix.timestamp)
                });
            if let Some(member) = member {
                txn.update(&member.meta.local_id, |member: &mut Member| {
                    member.last_lat = Some(fix.lat);
                    member.last_lng = Some(fix.lng);
                    member.last_location_at = Some(fix.timestamp);
                })?;
            }
            Ok(point)
        })
        .await
    }

    /// Live lists of a family, in display order
    pub async fn lists_for_family(&self, family_id: &ServerId) -> Result<Vec<List>> {
        self.fetch(
            &Query::new()
                .eq("family_id", family_id.as_str())
                .sort_by("sort_order", super::SortOrder::Asc)
                .sort_by("created_at", super::SortOrder::Asc),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MutationKind;
    use crate::models::{GeofenceTrigger, Model, RecordMeta};
    use pretty_assertions::assert_eq;

    fn family() -> ServerId {
        ServerId::from("fam1")
    }

    async fn store_with_list() -> (LocalStore, List) {
        let store = LocalStore::open_in_memory().unwrap();
        let list = store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();
        (store, list)
    }

    #[tokio::test]
    async fn test_create_list_queues_create() {
        let (store, list) = store_with_list().await;
        assert!(list.meta.is_pending());
        assert_eq!(list.meta.server_id.as_str().len(), 15);

        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, MutationKind::Create);
        assert_eq!(pending[0].local_id, list.meta.local_id);
    }

    #[tokio::test]
    async fn test_blank_names_are_rejected() {
        let (store, list) = store_with_list().await;
        let error = store
            .create_list(&family(), "   ", ListType::Todo, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));

        let error = store
            .add_item(&list.meta.local_id, "", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rename_keeps_single_create_entry() {
        let (store, list) = store_with_list().await;
        let renamed = store
            .rename_list(&list.meta.local_id, "Weekly shop")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Weekly shop");
        assert!(renamed.meta.updated_at > list.meta.updated_at);

        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, MutationKind::Create);
    }

    #[tokio::test]
    async fn test_add_item_orders_after_unchecked_items() {
        let (store, list) = store_with_list().await;
        let milk = store
            .add_item(&list.meta.local_id, "Milk", Some("2".into()), None, None)
            .await
            .unwrap();
        let eggs = store
            .add_item(&list.meta.local_id, "Eggs", None, Some("  ".into()), None)
            .await
            .unwrap();
        assert_eq!(milk.sort_order, 0);
        assert_eq!(milk.quantity.as_deref(), Some("2"));
        assert_eq!(eggs.sort_order, 1);
        assert_eq!(eggs.note, None);
        assert_eq!(eggs.list_id, list.meta.server_id);

        store.toggle_item(&milk.meta.local_id, None).await.unwrap();
        let bread = store
            .add_item(&list.meta.local_id, "Bread", None, None, None)
            .await
            .unwrap();
        assert_eq!(bread.sort_order, 1);
    }

    #[tokio::test]
    async fn test_add_item_to_deleted_list_fails() {
        let (store, list) = store_with_list().await;
        store.delete_list(&list.meta.local_id).await.unwrap();

        let error = store
            .add_item(&list.meta.local_id, "Milk", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ReferentialIntegrity(_)));
    }

    #[tokio::test]
    async fn test_toggle_item_records_checker() {
        let (store, list) = store_with_list().await;
        let item = store
            .add_item(&list.meta.local_id, "Milk", None, None, None)
            .await
            .unwrap();
        let me = ServerId::from("user1");

        let checked = store.toggle_item(&item.meta.local_id, Some(&me)).await.unwrap();
        assert!(checked.is_checked);
        assert_eq!(checked.checked_by, Some(me.clone()));

        let unchecked = store.toggle_item(&item.meta.local_id, Some(&me)).await.unwrap();
        assert!(!unchecked.is_checked);
        assert_eq!(unchecked.checked_by, None);
    }

    #[tokio::test]
    async fn test_update_item_patch() {
        let (store, list) = store_with_list().await;
        let item = store
            .add_item(&list.meta.local_id, "Milk", Some("1".into()), Some("oat".into()), None)
            .await
            .unwrap();

        let updated = store
            .update_item(
                &item.meta.local_id,
                ItemPatch {
                    name: Some("Oat milk".into()),
                    quantity: Some(String::new()),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Oat milk");
        assert_eq!(updated.quantity, None);
        assert_eq!(updated.note.as_deref(), Some("oat"));
    }

    #[tokio::test]
    async fn test_deleting_unpushed_list_removes_everything() {
        let (store, list) = store_with_list().await;
        store
            .add_item(&list.meta.local_id, "Milk", None, None, None)
            .await
            .unwrap();

        store.delete_list(&list.meta.local_id).await.unwrap();

        assert!(store.pending_mutations().await.unwrap().is_empty());
        assert!(store
            .fetch::<List>(&Query::new().include_deleted())
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .fetch::<ListItem>(&Query::new().include_deleted())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_deleting_synced_list_soft_deletes_and_cascades() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut list = List::new(family(), "Groceries", ListType::Shopping, None, 1);
        list.meta = RecordMeta::synced(ServerId::from("list1"), 1, 1);
        let mut item = ListItem::new(ServerId::from("list1"), "Milk", None, 1);
        item.meta = RecordMeta::synced(ServerId::from("item1"), 1, 1);
        store
            .write(|txn| {
                txn.put_record(&list.clone().into_record())?;
                txn.put_record(&item.clone().into_record())
            })
            .await
            .unwrap();

        store.delete_list(&list.meta.local_id).await.unwrap();

        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, MutationKind::Delete);
        assert_eq!(pending[0].collection, Collection::Lists);

        assert!(store.fetch::<List>(&Query::new()).await.unwrap().is_empty());
        assert!(store.fetch::<ListItem>(&Query::new()).await.unwrap().is_empty());
        let items = store
            .fetch::<ListItem>(&Query::new().include_deleted())
            .await
            .unwrap();
        assert!(items[0].meta.is_deleted);
    }

    #[tokio::test]
    async fn test_toggle_geofence() {
        let store = LocalStore::open_in_memory().unwrap();
        let geofence = Geofence {
            meta: RecordMeta::synced(ServerId::from("geo1"), 1, 1),
            family_id: family(),
            name: "School".to_string(),
            lat: 51.5,
            lng: -0.12,
            radius: 150.0,
            trigger_on: GeofenceTrigger::Enter,
            watch_user_id: None,
            notify_user_id: None,
            enabled: true,
        };
        store
            .write(|txn| txn.put_record(&geofence.clone().into_record()))
            .await
            .unwrap();

        let toggled = store.toggle_geofence(&geofence.meta.local_id).await.unwrap();
        assert!(!toggled.enabled);
        assert!(toggled.meta.is_pending());
        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending[0].kind, MutationKind::Update);
    }

    #[tokio::test]
    async fn test_lists_for_family() {
        let (store, _) = store_with_list().await;
        store
            .create_list(&ServerId::from("other"), "Theirs", ListType::Todo, None)
            .await
            .unwrap();
        let lists = store.lists_for_family(&family()).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, "Groceries");
    }

    fn school() -> NewGeofence {
        NewGeofence {
            name: " School ".to_string(),
            lat: 51.5,
            lng: -0.12,
            radius: 150.0,
            trigger_on: GeofenceTrigger::Both,
            watch_user_id: Some(ServerId::from("kid1")),
            notify_user_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_geofence_defaults_notify_to_creator() {
        let store = LocalStore::open_in_memory().unwrap();
        let creator = ServerId::from("parent1");
        let geofence = store
            .create_geofence(&family(), school(), Some(&creator))
            .await
            .unwrap();

        assert_eq!(geofence.name, "School");
        assert!(geofence.enabled);
        assert_eq!(geofence.notify_user_id, Some(creator));
        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].collection, Collection::Geofences);
        assert_eq!(pending[0].kind, MutationKind::Create);
    }

    #[tokio::test]
    async fn test_geofence_validation() {
        let store = LocalStore::open_in_memory().unwrap();
        let bad_radius = NewGeofence {
            radius: 0.0,
            ..school()
        };
        assert!(matches!(
            store.create_geofence(&family(), bad_radius, None).await,
            Err(Error::InvalidInput(_))
        ));
        let bad_lat = NewGeofence {
            lat: 91.0,
            ..school()
        };
        assert!(store.create_geofence(&family(), bad_lat, None).await.is_err());

        let geofence = store.create_geofence(&family(), school(), None).await.unwrap();
        let patch = GeofencePatch {
            lng: Some(-181.0),
            ..GeofencePatch::default()
        };
        assert!(store
            .update_geofence(&geofence.meta.local_id, patch)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_geofence() {
        let store = LocalStore::open_in_memory().unwrap();
        let geofence = store.create_geofence(&family(), school(), None).await.unwrap();

        let updated = store
            .update_geofence(
                &geofence.meta.local_id,
                GeofencePatch {
                    radius: Some(300.0),
                    trigger_on: Some(GeofenceTrigger::Exit),
                    watch_user_id: Some(None),
                    ..GeofencePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.radius, 300.0);
        assert_eq!(updated.trigger_on, GeofenceTrigger::Exit);
        assert_eq!(updated.watch_user_id, None);
        assert_eq!(updated.name, "School");
        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, MutationKind::Create);

        store.delete_geofence(&geofence.meta.local_id).await.unwrap();
        assert!(store.pending_mutations().await.unwrap().is_empty());
        assert!(store
            .find::<Geofence>(&geofence.meta.local_id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_record_location_moves_member() {
        let store = LocalStore::open_in_memory().unwrap();
        let member = Member {
            meta: RecordMeta::synced(ServerId::from("user1"), 1, 1),
            family_id: family(),
            name: "Ada".to_string(),
            email: None,
            role: crate::models::MemberRole::Member,
            location_sharing_mode: crate::models::SharingMode::Always,
            last_lat: None,
            last_lng: None,
            last_location_at: None,
        };
        store
            .write(|txn| txn.put_record(&member.clone().into_record()))
            .await
            .unwrap();

        let fix = LocationFix {
            lat: 48.85,
            lng: 2.35,
            accuracy: Some(12.0),
            battery_level: Some(80.0),
            timestamp: 5_000,
        };
        let point = store
            .record_location(&ServerId::from("user1"), fix)
            .await
            .unwrap();
        assert_eq!(point.user_id, ServerId::from("user1"));
        assert!(point.meta.is_pending());

        let moved: Member = store.find(&member.meta.local_id).await.unwrap();
        assert_eq!(moved.last_lat, Some(48.85));
        assert_eq!(moved.last_location_at, Some(5_000));

        let older = LocationFix {
            timestamp: 4_000,
            lat: 0.0,
            ..fix
        };
        store
            .record_location(&ServerId::from("user1"), older)
            .await
            .unwrap();
        let kept: Member = store.find(&member.meta.local_id).await.unwrap();
        assert_eq!(kept.last_location_at, Some(5_000));

        let pending = store.pending_mutations().await.unwrap();
        let kinds: Vec<(Collection, MutationKind)> = pending
            .iter()
            .map(|entry| (entry.collection, entry.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (Collection::LocationHistory, MutationKind::Create),
                (Collection::Members, MutationKind::Update),
                (Collection::LocationHistory, MutationKind::Create),
            ]
        );
    }

    #[tokio::test]
    async fn test_record_location_for_unknown_member() {
        let store = LocalStore::open_in_memory().unwrap();
        let fix = LocationFix {
            lat: 1.0,
            lng: 1.0,
            accuracy: None,
            battery_level: None,
            timestamp: 10,
        };
        store
            .record_location(&ServerId::from("ghost"), fix)
            .await
            .unwrap();
        assert_eq!(store.pending_mutations().await.unwrap().len(), 1);
    }
}
