//! End-to-end capture/apply flows against the mock target process.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use repose_core::{
    ApplyOptions, BoneDef, Channel, EditFlags, MockProcess, OffsetChain, PoseEngine, PoseSnapshot,
    Quat, SavedBone, Skeleton, SkeletonMap, SnapshotConfig, SyncLoop, Vec3, WaitSignal,
};

const MODULE_BASE: u64 = 0x1000;
const ARRAY_BASE: u64 = 0x4000;
const STRIDE: u64 = 0x30;
const POS_OFF: u64 = 0x00;
const ROT_OFF: u64 = 0x0C;
const SCALE_OFF: u64 = 0x1C;

fn chain_map() -> SkeletonMap {
    SkeletonMap {
        version: "test".to_string(),
        transform_array: OffsetChain::new().deref(0x10),
        transform_stride: STRIDE as i64,
        position_offset: POS_OFF as i64,
        rotation_offset: ROT_OFF as i64,
        scale_offset: SCALE_OFF as i64,
        bones: vec![
            BoneDef {
                name: "Root".to_string(),
                index: 0,
                parent: None,
            },
            BoneDef {
                name: "Spine".to_string(),
                index: 1,
                parent: Some("Root".to_string()),
            },
            BoneDef {
                name: "Head".to_string(),
                index: 2,
                parent: Some("Spine".to_string()),
            },
        ],
    }
}

fn bone_field(index: u64, field: u64) -> u64 {
    ARRAY_BASE + index * STRIDE + field
}

fn plant_vec3(mock: &MockProcess, address: u64, v: Vec3) {
    mock.plant_f32(address, v.x);
    mock.plant_f32(address + 4, v.y);
    mock.plant_f32(address + 8, v.z);
}

fn plant_quat(mock: &MockProcess, address: u64, q: Quat) {
    mock.plant_f32(address, q.x);
    mock.plant_f32(address + 4, q.y);
    mock.plant_f32(address + 8, q.z);
    mock.plant_f32(address + 12, q.w);
}

fn peek_vec3(mock: &MockProcess, address: u64) -> Vec3 {
    let raw = mock.peek(address, 12);
    Vec3::new(
        f32::from_le_bytes(raw[0..4].try_into().unwrap()),
        f32::from_le_bytes(raw[4..8].try_into().unwrap()),
        f32::from_le_bytes(raw[8..12].try_into().unwrap()),
    )
}

fn peek_quat(mock: &MockProcess, address: u64) -> Quat {
    let raw = mock.peek(address, 16);
    Quat::new(
        f32::from_le_bytes(raw[0..4].try_into().unwrap()),
        f32::from_le_bytes(raw[4..8].try_into().unwrap()),
        f32::from_le_bytes(raw[8..12].try_into().unwrap()),
        f32::from_le_bytes(raw[12..16].try_into().unwrap()),
    )
}

/// Mock with three posed bones: distinct non-zero transforms per bone.
fn posed_mock() -> MockProcess {
    let mock = MockProcess::builder()
        .base_address(MODULE_BASE)
        .region(MODULE_BASE, 0x100)
        .region(ARRAY_BASE, 0x200)
        .build();
    mock.plant_pointer(MODULE_BASE + 0x10, ARRAY_BASE);

    for index in 0..3u64 {
        let i = index as f32;
        plant_vec3(
            &mock,
            bone_field(index, POS_OFF),
            Vec3::new(1.0 + i, 2.0 + i, 3.0 + i),
        );
        plant_quat(
            &mock,
            bone_field(index, ROT_OFF),
            Quat::new(0.1 * i, 0.0, 0.0, 1.0),
        );
        plant_vec3(&mock, bone_field(index, SCALE_OFF), Vec3::ONE);
    }
    mock
}

fn engine() -> PoseEngine {
    PoseEngine::new(Arc::new(EditFlags::new()), Arc::new(WaitSignal::new()))
}

#[test]
fn capture_then_apply_restores_every_bone_bitwise() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let snapshot = eng
        .capture(&mut skeleton, &mock, &SnapshotConfig::default())
        .unwrap();
    assert_eq!(snapshot.bones.len(), 3);

    // The pose drifts: every transform moves to a different non-zero value.
    for index in 0..3u64 {
        plant_vec3(&mock, bone_field(index, POS_OFF), Vec3::new(9.0, 9.0, 9.0));
        plant_quat(
            &mock,
            bone_field(index, ROT_OFF),
            Quat::new(0.7, 0.0, 0.7, 0.0),
        );
        plant_vec3(
            &mock,
            bone_field(index, SCALE_OFF),
            Vec3::new(2.0, 2.0, 2.0),
        );
    }

    let report = eng
        .apply(&mut skeleton, &mock, &snapshot, &ApplyOptions::default())
        .unwrap();
    assert_eq!(report.applied, 3);
    assert!(report.missing.is_empty());
    assert!(report.failed.is_empty());
    assert!(!report.interrupted);

    for (index, name) in [(0u64, "Root"), (1, "Spine"), (2, "Head")] {
        let saved = snapshot.bones[name].as_ref().unwrap();
        let live_pos = peek_vec3(&mock, bone_field(index, POS_OFF));
        let live_rot = peek_quat(&mock, bone_field(index, ROT_OFF));
        let live_scale = peek_vec3(&mock, bone_field(index, SCALE_OFF));
        assert_eq!(live_pos.to_bits(), saved.position.unwrap().to_bits());
        assert_eq!(live_rot.to_bits(), saved.rotation.unwrap().to_bits());
        assert_eq!(live_scale.to_bits(), saved.scale.unwrap().to_bits());
    }
}

#[test]
fn selection_filter_touches_only_the_named_bone() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let snapshot = eng
        .capture(&mut skeleton, &mock, &SnapshotConfig::default())
        .unwrap();

    // Drift every bone, then apply only Head.
    for index in 0..3u64 {
        plant_quat(
            &mock,
            bone_field(index, ROT_OFF),
            Quat::new(0.5, 0.5, 0.5, 0.5),
        );
    }

    let options = ApplyOptions {
        selection: Some(["Head".to_string()].into_iter().collect()),
        ..Default::default()
    };
    let report = eng.apply(&mut skeleton, &mock, &snapshot, &options).unwrap();
    assert_eq!(report.applied, 1);

    let drifted = Quat::new(0.5, 0.5, 0.5, 0.5);
    assert_eq!(
        peek_quat(&mock, bone_field(0, ROT_OFF)).to_bits(),
        drifted.to_bits(),
        "Root must keep its pre-apply value"
    );
    assert_eq!(
        peek_quat(&mock, bone_field(1, ROT_OFF)).to_bits(),
        drifted.to_bits(),
        "Spine must keep its pre-apply value"
    );
    assert_eq!(
        peek_quat(&mock, bone_field(2, ROT_OFF)).to_bits(),
        snapshot.bones["Head"].as_ref().unwrap().rotation.unwrap().to_bits()
    );
}

#[test]
fn null_entry_leaves_the_live_field_untouched() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let mut bones = BTreeMap::new();
    bones.insert(
        "Root".to_string(),
        Some(SavedBone {
            position: None,
            rotation: Some(Quat::IDENTITY),
            scale: None,
        }),
    );
    let snapshot = PoseSnapshot {
        config: SnapshotConfig::default(),
        captured_at: chrono::Utc::now(),
        bones,
    };

    let before = peek_vec3(&mock, bone_field(0, POS_OFF));
    let report = eng
        .apply(&mut skeleton, &mock, &snapshot, &ApplyOptions::default())
        .unwrap();
    assert_eq!(report.applied, 1);

    let after = peek_vec3(&mock, bone_field(0, POS_OFF));
    assert_eq!(
        after.to_bits(),
        before.to_bits(),
        "null position entry must not be applied even with load_positions on"
    );
    assert_eq!(
        peek_quat(&mock, bone_field(0, ROT_OFF)).to_bits(),
        Quat::IDENTITY.to_bits()
    );
}

#[test]
fn rotations_only_snapshot_never_writes_positions() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let config = SnapshotConfig {
        include_position: false,
        include_rotation: true,
        include_scale: false,
        selected_bones_only: false,
    };
    let snapshot = eng.capture(&mut skeleton, &mock, &config).unwrap();

    for (_, entry) in &snapshot.bones {
        let saved = entry.as_ref().unwrap();
        assert!(saved.position.is_none());
        assert!(saved.rotation.is_some());
        assert!(saved.scale.is_none());
    }

    // Drift positions and rotations.
    for index in 0..3u64 {
        plant_vec3(&mock, bone_field(index, POS_OFF), Vec3::new(8.0, 8.0, 8.0));
        plant_quat(
            &mock,
            bone_field(index, ROT_OFF),
            Quat::new(0.3, 0.3, 0.3, 0.8),
        );
    }
    mock.clear_writes();

    // Requesting positions cannot resurrect a channel the snapshot never
    // captured: intersection is rotations only.
    let report = eng
        .apply(&mut skeleton, &mock, &snapshot, &ApplyOptions::default())
        .unwrap();
    assert_eq!(report.applied, 3);

    let drifted = Vec3::new(8.0, 8.0, 8.0);
    for index in 0..3u64 {
        assert_eq!(
            peek_vec3(&mock, bone_field(index, POS_OFF)).to_bits(),
            drifted.to_bits(),
            "no position may change"
        );
        let saved = snapshot.bones[["Root", "Spine", "Head"][index as usize]]
            .as_ref()
            .unwrap();
        assert_eq!(
            peek_quat(&mock, bone_field(index, ROT_OFF)).to_bits(),
            saved.rotation.unwrap().to_bits()
        );
    }

    // Parents precede children in every pass: the rotation write sequence
    // is Root, Spine, Head repeated once per pass.
    let rotation_writes: Vec<u64> = mock
        .writes()
        .into_iter()
        .filter(|(_, bytes)| bytes.len() == 16)
        .map(|(address, _)| address)
        .collect();
    let expected: Vec<u64> = (0..3)
        .flat_map(|_| {
            [
                bone_field(0, ROT_OFF),
                bone_field(1, ROT_OFF),
                bone_field(2, ROT_OFF),
            ]
        })
        .collect();
    assert_eq!(rotation_writes, expected);
}

#[test]
fn missing_snapshot_bone_is_skipped_not_fatal() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let mut snapshot = eng
        .capture(&mut skeleton, &mock, &SnapshotConfig::default())
        .unwrap();
    snapshot.bones.insert(
        "Tail".to_string(),
        Some(SavedBone {
            position: Some(Vec3::ONE),
            rotation: Some(Quat::IDENTITY),
            scale: Some(Vec3::ONE),
        }),
    );

    let report = eng
        .apply(&mut skeleton, &mock, &snapshot, &ApplyOptions::default())
        .unwrap();
    assert_eq!(report.missing, vec!["Tail".to_string()]);
    assert_eq!(report.applied, 3);
}

#[test]
fn collapsed_zero_position_is_never_overwritten() {
    let mock = posed_mock();
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();
    let eng = engine();

    let snapshot = eng
        .capture(&mut skeleton, &mock, &SnapshotConfig::default())
        .unwrap();

    // Spine's transform collapses to the resting state.
    plant_vec3(&mock, bone_field(1, POS_OFF), Vec3::ZERO);
    plant_vec3(&mock, bone_field(1, SCALE_OFF), Vec3::ZERO);

    eng.apply(&mut skeleton, &mock, &snapshot, &ApplyOptions::default())
        .unwrap();

    assert!(
        peek_vec3(&mock, bone_field(1, POS_OFF)).is_zero(),
        "collapsed position stays collapsed"
    );
    assert!(peek_vec3(&mock, bone_field(1, SCALE_OFF)).is_zero());
    // Rotation has no collapse guard and is restored.
    assert_eq!(
        peek_quat(&mock, bone_field(1, ROT_OFF)).to_bits(),
        snapshot.bones["Spine"].as_ref().unwrap().rotation.unwrap().to_bits()
    );
}

#[test]
fn freeze_flags_come_down_when_the_process_dies_mid_apply() {
    let mock = Arc::new(posed_mock());
    let mut skeleton = Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap();

    let flags = Arc::new(EditFlags::new());
    let eng = PoseEngine::new(Arc::clone(&flags), Arc::new(WaitSignal::new()));

    let snapshot = eng
        .capture(&mut skeleton, mock.as_ref(), &SnapshotConfig::default())
        .unwrap();

    // The target dies partway through the multi-pass sequence.
    let killer = {
        let mock = Arc::clone(&mock);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            mock.simulate_exit();
        })
    };

    let result = eng.apply(
        &mut skeleton,
        mock.as_ref(),
        &snapshot,
        &ApplyOptions::default(),
    );
    killer.join().unwrap();

    assert!(result.is_err(), "a dead target must surface an error");
    for channel in Channel::ALL {
        assert!(
            !flags.is_frozen(channel),
            "{channel} must be unfrozen after a failed apply"
        );
    }
    assert!(!flags.is_editing(), "the edit slot must be released");
}

#[test]
fn sync_loop_resumes_refreshing_after_an_apply() {
    let mock = Arc::new(posed_mock());
    let skeleton = Arc::new(Mutex::new(
        Skeleton::mirror(&chain_map(), MODULE_BASE).unwrap(),
    ));
    let flags = Arc::new(EditFlags::new());
    let eng = PoseEngine::new(Arc::clone(&flags), Arc::new(WaitSignal::new()));

    let handle = SyncLoop::spawn(
        Arc::clone(&skeleton),
        Arc::clone(&mock) as Arc<dyn repose_core::ProcessMemory>,
        Arc::clone(&flags),
        Arc::new(WaitSignal::new()),
        Duration::from_millis(5),
        None,
    );

    let snapshot = {
        let mut skeleton = skeleton.lock().unwrap();
        eng.capture(&mut skeleton, mock.as_ref(), &SnapshotConfig::default())
            .unwrap()
    };
    {
        let mut skeleton = skeleton.lock().unwrap();
        eng.apply(
            &mut skeleton,
            mock.as_ref(),
            &snapshot,
            &ApplyOptions::default(),
        )
        .unwrap();
    }

    // After the apply the loop must observe external mutation again.
    let moved = Vec3::new(6.0, 6.0, 6.0);
    plant_vec3(&mock, bone_field(0, POS_OFF), moved);

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    let mut observed = false;
    while std::time::Instant::now() < deadline {
        if skeleton
            .lock()
            .unwrap()
            .bone("Root")
            .unwrap()
            .last_transform()
            .map(|t| t.position.to_bits() == moved.to_bits())
            .unwrap_or(false)
        {
            observed = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(observed, "sync loop must resume normal refresh after apply");

    handle.stop();
}
