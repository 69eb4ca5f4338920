//! Local cache of the hub's device and scene topology.
//!
//! Every change to cached attributes goes through one reconciliation path:
//! derive the host attributes, diff them against the cached ones and emit
//! only what changed. Pushes, re-enumeration and optimistic command updates
//! all share it.

use std::collections::BTreeMap;
use std::sync::Arc;

use caseta_protocol::{
    AttributeDelta, AttributeName, AttributeValue, DerivedAttributes, DeviceKind, DeviceRecord,
    EntityRef, EntityState, SceneRecord,
};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::events::EventEmitter;
use crate::session::HubSession;

struct MirrorEntry {
    record: DeviceRecord,
    derived: DerivedAttributes,
    /// Last non-zero native level, restored by a plain "turn on".
    last_on_level: Option<u8>,
}

struct MirrorState {
    devices: BTreeMap<String, MirrorEntry>,
    scenes: BTreeMap<String, SceneRecord>,
    active_scene: Option<String>,
    stale: bool,
    /// Bumped by every `mark_stale`; a refresh started in an older epoch
    /// is discarded.
    epoch: u64,
}

/// Last-known device and scene state for one hub.
///
/// Contents are only authoritative while the hub is connected. Once marked
/// stale, reads report UNAVAILABLE until the next successful refresh.
pub struct DeviceMirror {
    hub_id: String,
    state: RwLock<MirrorState>,
    events: Arc<EventEmitter>,
}

impl DeviceMirror {
    pub fn new(events: Arc<EventEmitter>) -> Self {
        Self {
            hub_id: events.hub_id().to_string(),
            state: RwLock::new(MirrorState {
                devices: BTreeMap::new(),
                scenes: BTreeMap::new(),
                active_scene: None,
                stale: true,
                epoch: 0,
            }),
            events,
        }
    }

    /// Re-enumerates every device and scene and replaces the cache.
    ///
    /// All listings are fetched before anything is replaced, so a failing
    /// listing leaves the previous contents untouched. Emits the full
    /// attribute set of every device.
    pub async fn refresh_devices(&self, session: &dyn HubSession) -> Result<(), BridgeError> {
        let epoch = self.state.read().await.epoch;

        let mut records = Vec::new();
        for kind in DeviceKind::ALL {
            let listed = session
                .list_devices(kind)
                .await
                .map_err(|e| BridgeError::Protocol(format!("listing {kind} devices: {e}")))?;
            records.extend(listed);
        }
        let scenes = session
            .list_scenes()
            .await
            .map_err(|e| BridgeError::Protocol(format!("listing scenes: {e}")))?;

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            debug!(hub = %self.hub_id, "refresh overtaken by disconnect, discarding");
            return Err(BridgeError::Superseded);
        }

        let mut previous = std::mem::take(&mut state.devices);
        for record in records {
            let last_on_level = Some(record.raw_level)
                .filter(|l| *l > 0)
                .or_else(|| previous.get(&record.device_id).and_then(|e| e.last_on_level));
            let entity = EntityRef::device(&self.hub_id, &record);
            let derived = DerivedAttributes::from_record(&record);
            self.events.update(AttributeDelta {
                entity,
                changes: derived.changes(),
            });
            state.devices.insert(
                record.device_id.clone(),
                MirrorEntry {
                    record,
                    derived,
                    last_on_level,
                },
            );
        }

        // Devices the hub no longer lists.
        previous.retain(|id, _| !state.devices.contains_key(id));
        for entry in previous.values() {
            self.events.update(unavailable_delta(&self.hub_id, &entry.record));
        }

        let scenes: BTreeMap<String, SceneRecord> = scenes
            .into_iter()
            .map(|s| (s.scene_id.clone(), s))
            .collect();
        for scene_id in state.scenes.keys().filter(|id| !scenes.contains_key(*id)) {
            self.events.update(
                AttributeDelta::new(EntityRef::scene(&self.hub_id, scene_id)).with(
                    AttributeName::State,
                    AttributeValue::State(EntityState::Unavailable),
                ),
            );
        }
        state.scenes = scenes;
        let active_known = state
            .active_scene
            .as_ref()
            .is_none_or(|active| state.scenes.contains_key(active));
        if !active_known {
            state.active_scene = None;
        }
        for scene_id in state.scenes.keys() {
            let on = state.active_scene.as_ref() == Some(scene_id);
            self.events.update(scene_delta(&self.hub_id, scene_id, on));
        }

        state.stale = false;
        debug!(
            hub = %self.hub_id,
            devices = state.devices.len(),
            scenes = state.scenes.len(),
            "mirror refreshed"
        );
        Ok(())
    }

    /// Re-fetches one device after the hub reported a change on it.
    pub async fn on_device_pushed(
        &self,
        session: &dyn HubSession,
        device_id: &str,
    ) -> Result<(), BridgeError> {
        let fetched = session
            .device(device_id)
            .await
            .map_err(|e| BridgeError::Protocol(format!("fetching device {device_id}: {e}")))?;
        match fetched {
            Some(record) => {
                self.apply_record(record).await;
            }
            None => debug!(hub = %self.hub_id, device = %device_id, "pushed device not found"),
        }
        Ok(())
    }

    /// Records the level a successful command implies.
    ///
    /// Returns `None` for devices the mirror doesn't know. The read and the
    /// write happen under one guard so a concurrent push can't be lost.
    pub(crate) async fn apply_optimistic(
        &self,
        device_id: &str,
        level: u8,
    ) -> Option<DerivedAttributes> {
        let mut state = self.state.write().await;
        let mut record = state.devices.get(device_id)?.record.clone();
        record.raw_level = level;
        Some(self.store_record(&mut state, record))
    }

    async fn apply_record(&self, record: DeviceRecord) -> DerivedAttributes {
        let mut state = self.state.write().await;
        self.store_record(&mut state, record)
    }

    /// Stores `record`, emitting only the attributes that changed.
    ///
    /// While stale, the record is kept for display but nothing is emitted.
    fn store_record(&self, state: &mut MirrorState, record: DeviceRecord) -> DerivedAttributes {
        let stale = state.stale;
        let derived = DerivedAttributes::from_record(&record);
        let previous = state.devices.get(&record.device_id);
        let changes = derived.diff(previous.map(|e| &e.derived));
        let last_on_level = if record.raw_level > 0 {
            Some(record.raw_level)
        } else {
            previous.and_then(|e| e.last_on_level)
        };

        if !stale && !changes.is_empty() {
            self.events.update(AttributeDelta {
                entity: EntityRef::device(&self.hub_id, &record),
                changes,
            });
        } else {
            trace!(hub = %self.hub_id, device = %record.device_id, stale, "no attribute change");
        }

        state.devices.insert(
            record.device_id.clone(),
            MirrorEntry {
                record,
                derived,
                last_on_level,
            },
        );
        if stale { derived.unavailable() } else { derived }
    }

    /// Marks every record stale and reports every entity UNAVAILABLE.
    ///
    /// Also clears the active scene. Repeated calls emit nothing new.
    pub async fn mark_stale(&self) {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.active_scene = None;
        if state.stale {
            return;
        }
        state.stale = true;

        for entry in state.devices.values() {
            self.events.update(unavailable_delta(&self.hub_id, &entry.record));
        }
        for scene_id in state.scenes.keys() {
            self.events.update(
                AttributeDelta::new(EntityRef::scene(&self.hub_id, scene_id)).with(
                    AttributeName::State,
                    AttributeValue::State(EntityState::Unavailable),
                ),
            );
        }
        debug!(hub = %self.hub_id, devices = state.devices.len(), "mirror marked stale");
    }

    /// Records `scene_id` as the active scene.
    ///
    /// The new scene is reported ON and the previously active one OFF.
    /// Nothing is emitted if it was already active.
    pub(crate) async fn set_active_scene(&self, scene_id: &str) {
        let mut state = self.state.write().await;
        let previous = state.active_scene.replace(scene_id.to_string());
        if state.stale || previous.as_deref() == Some(scene_id) {
            return;
        }
        self.events.update(scene_delta(&self.hub_id, scene_id, true));
        if let Some(previous) = previous {
            self.events.update(scene_delta(&self.hub_id, &previous, false));
        }
    }

    pub async fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .map(|e| e.record.clone())
    }

    /// Current host attributes of a device. UNAVAILABLE while stale.
    pub async fn attributes(&self, device_id: &str) -> Option<DerivedAttributes> {
        let state = self.state.read().await;
        let entry = state.devices.get(device_id)?;
        Some(if state.stale {
            entry.derived.unavailable()
        } else {
            entry.derived
        })
    }

    pub(crate) async fn last_on_level(&self, device_id: &str) -> Option<u8> {
        self.state
            .read()
            .await
            .devices
            .get(device_id)
            .and_then(|e| e.last_on_level)
    }

    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.state
            .read()
            .await
            .devices
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.state.read().await.devices.keys().cloned().collect()
    }

    pub async fn scenes(&self) -> Vec<SceneRecord> {
        self.state.read().await.scenes.values().cloned().collect()
    }

    pub async fn scene(&self, scene_id: &str) -> Option<SceneRecord> {
        self.state.read().await.scenes.get(scene_id).cloned()
    }

    /// ON for the active scene, OFF for the rest, UNAVAILABLE while stale.
    pub async fn scene_state(&self, scene_id: &str) -> Option<EntityState> {
        let state = self.state.read().await;
        state.scenes.get(scene_id)?;
        Some(if state.stale {
            EntityState::Unavailable
        } else if state.active_scene.as_deref() == Some(scene_id) {
            EntityState::On
        } else {
            EntityState::Off
        })
    }

    pub async fn active_scene(&self) -> Option<String> {
        self.state.read().await.active_scene.clone()
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }
}

fn unavailable_delta(hub_id: &str, record: &DeviceRecord) -> AttributeDelta {
    AttributeDelta::new(EntityRef::device(hub_id, record)).with(
        AttributeName::State,
        AttributeValue::State(EntityState::Unavailable),
    )
}

fn scene_delta(hub_id: &str, scene_id: &str, on: bool) -> AttributeDelta {
    let state = if on { EntityState::On } else { EntityState::Off };
    AttributeDelta::new(EntityRef::scene(hub_id, scene_id))
        .with(AttributeName::State, AttributeValue::State(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BridgeEvent;
    use crate::test_support::{Call, FakeSession, device};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup(fake: FakeSession) -> (
        FakeSession,
        DeviceMirror,
        mpsc::UnboundedReceiver<BridgeEvent>,
    ) {
        let events = Arc::new(EventEmitter::new("hub-1"));
        let rx = events.subscribe();
        (fake, DeviceMirror::new(events), rx)
    }

    fn deltas(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<AttributeDelta> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let BridgeEvent::AttributeUpdate { delta, .. } = ev {
                out.push(delta);
            }
        }
        out
    }

    fn hub() -> FakeSession {
        FakeSession::new()
            .with_device("L1", DeviceKind::Light, "WallDimmer", 0)
            .with_device("S1", DeviceKind::Switch, "WallSwitch", 100)
            .with_device("C1", DeviceKind::Cover, "SerenaRollerShade", 40)
            .with_scene("s1", "Evening")
    }

    #[tokio::test]
    async fn new_mirror_is_stale_and_empty() {
        let (_fake, mirror, _rx) = setup(FakeSession::new());
        assert!(mirror.is_stale().await);
        assert!(mirror.devices().await.is_empty());
        assert!(mirror.attributes("L1").await.is_none());
    }

    #[tokio::test]
    async fn refresh_populates_and_emits_per_device() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();

        assert!(!mirror.is_stale().await);
        let l1 = mirror.attributes("L1").await.unwrap();
        assert_eq!(l1.state, EntityState::Off);
        assert_eq!(l1.brightness, Some(0));
        assert_eq!(mirror.attributes("S1").await.unwrap().state, EntityState::On);
        let c1 = mirror.attributes("C1").await.unwrap();
        assert_eq!(c1.state, EntityState::Open);
        assert_eq!(c1.position, Some(40));
        assert_eq!(mirror.scene("s1").await.unwrap().display_name, "Evening");
        assert_eq!(mirror.scene_state("s1").await, Some(EntityState::Off));

        let deltas = deltas(&mut rx);
        // Three devices plus one scene.
        assert_eq!(deltas.len(), 4);
        let light = deltas
            .iter()
            .find(|d| d.entity.object_id == "L1")
            .unwrap();
        assert_eq!(light.entity.entity_id(), "light.hub-1.L1");
        assert_eq!(light.state(), Some(EntityState::Off));
        assert_eq!(light.level(AttributeName::Brightness), Some(0));
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        let first = deltas(&mut rx);
        mirror.refresh_devices(&fake).await.unwrap();
        let second = deltas(&mut rx);
        assert_eq!(first, second);
        assert_eq!(mirror.devices().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_listing_keeps_previous_contents() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        fake.fail_listings(true);
        fake.set_level("L1", 80);
        let err = mirror.refresh_devices(&fake).await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        assert_eq!(mirror.device("L1").await.unwrap().raw_level, 0);
        assert!(deltas(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn removed_devices_are_reported_unavailable() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        let fresh = FakeSession::new().with_device("L1", DeviceKind::Light, "WallDimmer", 0);
        mirror.refresh_devices(&fresh).await.unwrap();
        let gone: Vec<_> = deltas(&mut rx)
            .into_iter()
            .filter(|d| d.state() == Some(EntityState::Unavailable))
            .map(|d| d.entity.object_id)
            .collect();
        assert_eq!(gone, vec!["C1".to_string(), "S1".to_string(), "s1".to_string()]);
        assert!(mirror.device("S1").await.is_none());
    }

    #[tokio::test]
    async fn push_emits_only_changed_attributes() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        fake.set_level("L1", 50);
        mirror.on_device_pushed(&fake, "L1").await.unwrap();
        let got = deltas(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].state(), Some(EntityState::On));
        assert_eq!(got[0].level(AttributeName::Brightness), Some(128));

        // Same level again: brightness unchanged, state unchanged.
        mirror.on_device_pushed(&fake, "L1").await.unwrap();
        assert!(deltas(&mut rx).is_empty());

        // Cover moving within OPEN only changes position.
        fake.set_level("C1", 60);
        mirror.on_device_pushed(&fake, "C1").await.unwrap();
        let got = deltas(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].state(), None);
        assert_eq!(got[0].level(AttributeName::Position), Some(60));
    }

    #[tokio::test]
    async fn push_inserts_unknown_device() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        fake.put_device(device("L9", DeviceKind::Light, "PlugInDimmer", 100));
        mirror.on_device_pushed(&fake, "L9").await.unwrap();
        assert_eq!(mirror.device("L9").await.unwrap().raw_level, 100);
        assert_eq!(deltas(&mut rx).len(), 1);
        assert_eq!(fake.count(&Call::Device("L9".into())), 1);
    }

    #[tokio::test]
    async fn push_for_missing_device_is_ignored() {
        let (fake, mirror, mut rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        mirror.on_device_pushed(&fake, "nope").await.unwrap();
        assert!(deltas(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn stale_reads_are_unavailable_with_values_kept() {
        let (fake, mirror, mut rx) = setup(hub());
        fake.set_level("L1", 100);
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        mirror.mark_stale().await;
        let l1 = mirror.attributes("L1").await.unwrap();
        assert_eq!(l1.state, EntityState::Unavailable);
        assert_eq!(l1.brightness, Some(255));
        assert_eq!(mirror.scene_state("s1").await, Some(EntityState::Unavailable));

        let got = deltas(&mut rx);
        assert_eq!(got.len(), 4);
        assert!(got.iter().all(|d| d.state() == Some(EntityState::Unavailable)));

        // Already stale: nothing new.
        mirror.mark_stale().await;
        assert!(deltas(&mut rx).is_empty());

        // Pushes while stale update the record silently.
        fake.set_level("L1", 0);
        mirror.on_device_pushed(&fake, "L1").await.unwrap();
        assert!(deltas(&mut rx).is_empty());
        assert_eq!(mirror.attributes("L1").await.unwrap().state, EntityState::Unavailable);

        mirror.refresh_devices(&fake).await.unwrap();
        assert_eq!(mirror.attributes("L1").await.unwrap().state, EntityState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_overtaken_by_mark_stale_is_discarded() {
        let (fake, mirror, mut rx) = setup(hub());
        fake.set_listing_delay(Duration::from_millis(50));

        let (refresh, ()) = tokio::join!(mirror.refresh_devices(&fake), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            mirror.mark_stale().await;
        });
        assert_eq!(refresh, Err(BridgeError::Superseded));
        assert!(mirror.is_stale().await);
        assert!(mirror.devices().await.is_empty());
        assert!(deltas(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn active_scene_switches_on_and_off() {
        let fake = hub().with_scene("s2", "Morning");
        let (fake, mirror, mut rx) = setup(fake);
        mirror.refresh_devices(&fake).await.unwrap();
        deltas(&mut rx);

        mirror.set_active_scene("s1").await;
        let got = deltas(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].entity.entity_id(), "button.hub-1.s1");
        assert_eq!(got[0].state(), Some(EntityState::On));

        mirror.set_active_scene("s2").await;
        let got = deltas(&mut rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].entity.object_id, "s2");
        assert_eq!(got[0].state(), Some(EntityState::On));
        assert_eq!(got[1].entity.object_id, "s1");
        assert_eq!(got[1].state(), Some(EntityState::Off));

        mirror.set_active_scene("s2").await;
        assert!(deltas(&mut rx).is_empty());
        assert_eq!(mirror.active_scene().await.as_deref(), Some("s2"));

        mirror.mark_stale().await;
        assert!(mirror.active_scene().await.is_none());
    }

    #[tokio::test]
    async fn optimistic_updates_track_last_on_level() {
        let (fake, mirror, _rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        assert_eq!(mirror.last_on_level("L1").await, None);
        assert_eq!(mirror.last_on_level("S1").await, Some(100));

        mirror.apply_optimistic("L1", 40).await.unwrap();
        mirror.apply_optimistic("L1", 0).await.unwrap();
        assert_eq!(mirror.last_on_level("L1").await, Some(40));
        assert!(mirror.apply_optimistic("missing", 10).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn optimistic_update_keeps_concurrently_pushed_fields() {
        let (fake, mirror, _rx) = setup(hub());
        mirror.refresh_devices(&fake).await.unwrap();
        let mirror = Arc::new(mirror);

        let mut renamed = fake.device("L1").await.unwrap().unwrap();
        renamed.display_name = "Kitchen".into();
        fake.put_device(renamed);

        let pusher = {
            let mirror = mirror.clone();
            let fake = Arc::new(fake);
            tokio::spawn(async move { mirror.on_device_pushed(fake.as_ref(), "L1").await })
        };
        for level in [10, 20, 30, 40] {
            mirror.apply_optimistic("L1", level).await.unwrap();
        }
        pusher.await.unwrap().unwrap();
        mirror.apply_optimistic("L1", 60).await.unwrap();

        let record = mirror.device("L1").await.unwrap();
        assert_eq!(record.display_name, "Kitchen");
        assert_eq!(record.raw_level, 60);
    }
}
