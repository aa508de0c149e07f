//! End-to-end state application against a recording render host

mod common;

use abr_core::{AbrError, DataRange, DirtyFlags, StateError};
use common::*;
use serde_json::json;

#[test]
fn test_first_apply_creates_and_renders_everything() {
    let (mut engine, log) = engine();
    let outcome = engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    assert!(outcome.cleared);
    assert_eq!(outcome.processed.len(), 2);
    assert_eq!(engine.impression_count(), 2);

    let report = engine.render();
    assert_eq!(report.rendered.len(), 2);
    assert!(report.failed.is_empty());

    let created = events(&log)
        .iter()
        .filter(|e| matches!(e, HostEvent::Created { .. }))
        .count();
    assert_eq!(created, 2);
    assert!(engine.impressions().all(|imp| imp.hints.is_clean()));
}

#[test]
fn test_identical_state_sets_no_flags() {
    let (mut engine, log) = engine();
    let text = two_glyphs(COLORMAP_BLUE);
    engine.apply_state(&text).unwrap();
    engine.render();
    clear_log(&log);

    let outcome = engine.apply_state(&text).unwrap();
    assert!(!outcome.cleared);
    assert!(outcome.changes.is_empty());
    assert_eq!(outcome.skipped.len(), 2);
    assert!(engine.impressions().all(|imp| imp.hints.is_clean()));

    engine.render();
    assert!(!events(&log)
        .iter()
        .any(|e| matches!(e, HostEvent::Created { .. } | HostEvent::Destroyed(_))));
}

#[test]
fn test_colormap_change_is_style_only() {
    let (mut engine, log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    clear_log(&log);

    let outcome = engine.apply_state(&two_glyphs(COLORMAP_RED)).unwrap();
    let a = uuid(GLYPHS_A);
    let b = uuid(GLYPHS_B);
    assert_eq!(outcome.flags(&a), DirtyFlags::STYLE_CHANGED);
    assert!(outcome.flags(&b).is_empty());

    let hints_a = engine.impression(&a).unwrap().hints;
    assert!(hints_a.style_changed());
    assert!(!hints_a.data_changed());
    assert!(engine.impression(&b).unwrap().hints.is_clean());

    engine.render();
    let object_a = engine.renderer().object(&a).unwrap();
    let applied: Vec<_> = events(&log)
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Applied { object, flags, .. } => Some((object, flags)),
            _ => None,
        })
        .collect();
    assert_eq!(applied, vec![(object_a, DirtyFlags::STYLE_CHANGED)]);
}

#[test]
fn test_added_impression_leaves_others_alone() {
    let (mut engine, _log) = engine();
    engine
        .apply_state(&state(&[(SURFACE_C, surface_impression(COLORMAP_RED))]))
        .unwrap();
    engine.render();

    let added = glyphs(POINTS, COLORMAP_RED, "0.1m");
    let outcome = engine
        .apply_state(&state(&[(SURFACE_C, surface_impression(COLORMAP_RED)), (GLYPHS_A, added)]))
        .unwrap();
    assert!(!outcome.cleared);
    assert!(outcome.flags(&uuid(SURFACE_C)).is_empty());
    assert!(outcome.flags(&uuid(GLYPHS_A)).contains(DirtyFlags::DATA_CHANGED));
}

#[test]
fn test_removed_impression_is_destroyed() {
    let (mut engine, log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    let a = uuid(GLYPHS_A);
    let b = uuid(GLYPHS_B);
    let object_b = engine.renderer().object(&b).unwrap();
    clear_log(&log);

    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, glyphs(POINTS, COLORMAP_BLUE, "0.1m"))]))
        .unwrap();
    assert!(!outcome.cleared);
    assert_eq!(outcome.removed, vec![b]);
    assert!(engine.impression(&b).is_none());
    assert!(engine.renderer().object(&b).is_none());
    assert!(engine.impression(&a).unwrap().hints.is_clean());
    assert_eq!(events(&log), vec![HostEvent::Destroyed(object_b)]);
}

#[test]
fn test_replacing_every_impression_clears_first() {
    let (mut engine, log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    clear_log(&log);

    let outcome = engine
        .apply_state(&state(&[(SURFACE_C, surface_impression(COLORMAP_RED))]))
        .unwrap();
    assert!(outcome.cleared);
    assert_eq!(engine.impression_count(), 1);
    assert!(engine.impression(&uuid(SURFACE_C)).is_some());
    let destroyed = events(&log)
        .iter()
        .filter(|e| matches!(e, HostEvent::Destroyed(_)))
        .count();
    assert_eq!(destroyed, 2);
    assert_eq!(engine.renderer().object_count(), 0);
}

#[test]
fn test_empty_state_clears() {
    let (mut engine, _log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    let outcome = engine.apply_state(&state(&[])).unwrap();
    assert!(outcome.cleared);
    assert_eq!(engine.impression_count(), 0);
    assert_eq!(engine.renderer().object_count(), 0);
}

#[test]
fn test_missing_visasset_leaves_input_unset() {
    let (mut engine, _log) = engine();
    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, glyphs(POINTS, COLORMAP_MISSING, "0.1m"))]))
        .unwrap();
    assert!(outcome.failed.is_empty());
    let imp = engine.impression(&uuid(GLYPHS_A)).unwrap();
    assert!(imp.input("Colormap").is_none());
    assert!(imp.key_data().is_some());

    // Still renders with the default colormap
    let report = engine.render();
    assert_eq!(report.rendered, vec![uuid(GLYPHS_A)]);
}

#[test]
fn test_invalid_state_is_rejected_and_previous_kept() {
    let (mut engine, _log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    let before = engine.current_state().cloned();

    let err = engine.apply_state(r#"{"version": "0.2.0", "impressions": {"x": 1}}"#);
    assert!(matches!(err, Err(AbrError::State(_))));
    let err = engine.apply_state(r#"{"version": "1.0.0"}"#);
    assert!(matches!(err, Err(AbrError::State(StateError::UnsupportedVersion { .. }))));

    assert_eq!(engine.current_state().cloned(), before);
    assert_eq!(engine.impression_count(), 2);
}

#[test]
fn test_visibility_toggle() {
    let (mut engine, log) = engine();
    let shown = state(&[(GLYPHS_A, glyphs(POINTS, COLORMAP_BLUE, "0.1m"))]);
    let mut hidden_imp = glyphs(POINTS, COLORMAP_BLUE, "0.1m");
    hidden_imp["renderHints"] = json!({"visible": false});
    let hidden = state(&[(GLYPHS_A, hidden_imp)]);

    engine.apply_state(&shown).unwrap();
    engine.render();
    clear_log(&log);

    let outcome = engine.apply_state(&hidden).unwrap();
    assert_eq!(outcome.flags(&uuid(GLYPHS_A)), DirtyFlags::VISIBILITY_CHANGED);
    engine.render();
    assert!(events(&log)
        .iter()
        .any(|e| matches!(e, HostEvent::Applied { visible: false, .. })));
}

#[test]
fn test_range_override_and_reset() {
    let (mut engine, _log) = engine();
    let base = two_glyphs(COLORMAP_BLUE);
    engine.apply_state(&base).unwrap();
    engine.render();

    let mut with_range: serde_json::Value = serde_json::from_str(&base).unwrap();
    with_range["dataRanges"] = json!({"scalarRanges": {TEMPERATURE: {"min": 0.0, "max": 100.0}}});
    let outcome = engine.apply_state(&with_range.to_string()).unwrap();
    assert_eq!(outcome.flags(&uuid(GLYPHS_A)), DirtyFlags::STYLE_CHANGED);
    assert_eq!(outcome.flags(&uuid(GLYPHS_B)), DirtyFlags::STYLE_CHANGED);
    let variable = engine.data().scalar_variable(TEMPERATURE).unwrap();
    assert!(variable.is_customized());
    assert_eq!(variable.range(), DataRange::new(0.0, 100.0));
    engine.render();

    engine.apply_state(&base).unwrap();
    let variable = engine.data().scalar_variable(TEMPERATURE).unwrap();
    assert!(!variable.is_customized());
    assert_eq!(variable.range(), DataRange::new(4.0, 20.0));
}

#[test]
fn test_local_visasset_edit_restyles_users() {
    let (mut engine, _log) = engine();
    let local = "d0000000-0000-4000-8000-000000000001";
    let make = |r: f32| {
        let mut value: serde_json::Value = serde_json::from_str(&state(&[(GLYPHS_A, glyphs(POINTS, local, "0.1m"))])).unwrap();
        value["localVisAssets"] = json!({
            local: {
                "artifactJson": {"type": "colormap", "artifactData": {"colormap": "colormap.xml"}},
                "artifactDataContents": {"colormap.xml": colormap_xml(r, 0.0)}
            }
        });
        value.to_string()
    };

    engine.apply_state(&make(1.0)).unwrap();
    assert!(engine.impression(&uuid(GLYPHS_A)).unwrap().input("Colormap").is_some());
    engine.render();

    let outcome = engine.apply_state(&make(0.5)).unwrap();
    assert!(outcome.flags(&uuid(GLYPHS_A)).contains(DirtyFlags::STYLE_CHANGED));
    assert!(!outcome.flags(&uuid(GLYPHS_A)).contains(DirtyFlags::DATA_CHANGED));
}

#[test]
fn test_scene_lights_and_background_reach_host() {
    let (mut engine, log) = engine();
    let mut value: serde_json::Value = serde_json::from_str(&two_glyphs(COLORMAP_BLUE)).unwrap();
    value["scene"] = json!({
        "lighting": [{"name": "Key"}, {"name": "Fill", "intensity": 0.4}],
        "backgroundColor": "#102030"
    });
    engine.apply_state(&value.to_string()).unwrap();
    engine.render();
    assert_eq!(engine.scene().lights().len(), 2);
    let log = events(&log);
    assert!(log.contains(&HostEvent::Lights(2)));
    assert!(log.iter().any(|e| matches!(e, HostEvent::Background(_))));
}

#[test]
fn test_unknown_plate_type_fails_only_its_impression() {
    let (mut engine, _log) = engine();
    let bogus = json!({"plateType": "Bogus", "inputValues": {}});
    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, glyphs(POINTS, COLORMAP_BLUE, "0.1m")), (GLYPHS_B, bogus)]))
        .unwrap();
    assert_eq!(outcome.processed, vec![uuid(GLYPHS_A)]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, uuid(GLYPHS_B));
    assert_eq!(engine.impression_count(), 1);
    assert!(engine.impression(&uuid(GLYPHS_B)).is_none());

    let report = engine.render();
    assert_eq!(report.rendered, vec![uuid(GLYPHS_A)]);
}

#[test]
fn test_unusable_inputs_are_left_unset() {
    let (mut engine, _log) = engine();
    let mut extra = glyphs(POINTS, COLORMAP_BLUE, "0.1m");
    extra["inputValues"]["NotASlot"] = json!({"inputType": "LengthPrimitive", "inputValue": "1m", "inputGenre": "Primitive"});
    let mut mislabeled = glyphs(POINTS, COLORMAP_BLUE, "0.1m");
    mislabeled["inputValues"]["Glyph Size"]["inputGenre"] = json!("Variable");

    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, extra), (GLYPHS_B, mislabeled)]))
        .unwrap();
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.processed.len(), 2);

    let a = engine.impression(&uuid(GLYPHS_A)).unwrap();
    assert!(a.key_data().is_some());
    assert!(a.input("Glyph Size").is_some());
    let b = engine.impression(&uuid(GLYPHS_B)).unwrap();
    assert!(b.key_data().is_some());
    assert!(b.input("Glyph Size").is_none());
}

#[test]
fn test_unresolvable_key_data_affects_only_its_impression() {
    let (mut engine, _log) = engine();
    let outcome = engine
        .apply_state(&state(&[
            (GLYPHS_A, glyphs(POINTS, COLORMAP_BLUE, "0.1m")),
            (GLYPHS_B, glyphs("Test/Ocean/KeyData/Missing", COLORMAP_BLUE, "0.1m")),
        ]))
        .unwrap();
    assert!(outcome.failed.is_empty());
    assert!(engine.impression(&uuid(GLYPHS_A)).unwrap().key_data().is_some());
    assert!(engine.impression(&uuid(GLYPHS_B)).unwrap().key_data().is_none());

    let report = engine.render();
    assert_eq!(report.rendered, vec![uuid(GLYPHS_A)]);
    assert!(engine.renderer().object(&uuid(GLYPHS_B)).is_none());
}

#[test]
fn test_api_range_survives_unrelated_state() {
    let (mut engine, _log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    engine.set_variable_range(TEMPERATURE, DataRange::new(1.0, 2.0)).unwrap();
    engine.render();

    let outcome = engine.apply_state(&two_glyphs(COLORMAP_RED)).unwrap();
    assert!(outcome.flags(&uuid(GLYPHS_B)).is_empty());
    let variable = engine.data().scalar_variable(TEMPERATURE).unwrap();
    assert!(variable.is_customized());
    assert_eq!(variable.range(), DataRange::new(1.0, 2.0));

    // A state range the next state leaves alone does not undo the override either
    let mut with_range: serde_json::Value = serde_json::from_str(&two_glyphs(COLORMAP_RED)).unwrap();
    with_range["dataRanges"] = json!({"scalarRanges": {TEMPERATURE: {"min": 0.0, "max": 100.0}}});
    engine.apply_state(&with_range.to_string()).unwrap();
    engine.set_variable_range(TEMPERATURE, DataRange::new(5.0, 6.0)).unwrap();
    with_range["impressions"][GLYPHS_A]["inputValues"]["Glyph Size"]["inputValue"] = json!("0.4m");
    engine.apply_state(&with_range.to_string()).unwrap();
    let variable = engine.data().scalar_variable(TEMPERATURE).unwrap();
    assert_eq!(variable.range(), DataRange::new(5.0, 6.0));
}

#[test]
fn test_visibility_flag_does_not_outlive_its_apply() {
    let (mut engine, log) = engine();
    let mut hidden_a = glyphs(POINTS, COLORMAP_BLUE, "0.1m");
    hidden_a["renderHints"] = json!({"visible": false});

    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();
    clear_log(&log);

    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, hidden_a.clone()), (GLYPHS_B, glyphs(POINTS, COLORMAP_RED, "0.2m"))]))
        .unwrap();
    assert_eq!(outcome.flags(&uuid(GLYPHS_A)), DirtyFlags::VISIBILITY_CHANGED);

    // No render in between; only B changes
    let outcome = engine
        .apply_state(&state(&[(GLYPHS_A, hidden_a), (GLYPHS_B, glyphs(POINTS, COLORMAP_RED, "0.3m"))]))
        .unwrap();
    assert_eq!(outcome.skipped, vec![uuid(GLYPHS_A)]);
    let a = engine.impression(&uuid(GLYPHS_A)).unwrap();
    assert!(!a.hints.flags.contains(DirtyFlags::VISIBILITY_CHANGED));
    assert!(!a.hints.visible);

    // The host still learns that A is hidden
    engine.render();
    let object_a = engine.renderer().object(&uuid(GLYPHS_A)).unwrap();
    assert!(events(&log)
        .iter()
        .any(|e| matches!(e, HostEvent::Applied { object, visible: false, .. } if *object == object_a)));
}

#[test]
fn test_reformatted_primitive_sets_no_flags() {
    let (mut engine, _log) = engine();
    engine.apply_state(&two_glyphs(COLORMAP_BLUE)).unwrap();
    engine.render();

    let outcome = engine
        .apply_state(&state(&[
            (GLYPHS_A, glyphs(POINTS, COLORMAP_BLUE, "0.10m")),
            (GLYPHS_B, glyphs(POINTS, COLORMAP_RED, "0.2m")),
        ]))
        .unwrap();
    assert!(outcome.flags(&uuid(GLYPHS_A)).is_empty());
    assert!(engine.impression(&uuid(GLYPHS_A)).unwrap().hints.is_clean());
}
