mod common;

use common::{row_field, seed_class, str_at, Sidecar};
use serde_json::json;

fn slot(
    sidecar: &mut Sidecar,
    template_id: &str,
    class_id: &str,
    time_slot: &str,
    room: &str,
) -> String {
    let created = sidecar.ok(
        "timetable.slotCreate",
        json!({
            "templateId": template_id,
            "classId": class_id,
            "timeSlot": time_slot,
            "subject": "Maths",
            "room": room,
        }),
    );
    str_at(&created, "/slotId").to_string()
}

#[test]
fn room_clash_is_rejected_then_resolved() {
    let (mut sidecar, _workspace) = Sidecar::with_workspace("main");
    let (class_a, _) = seed_class(&mut sidecar, "7A", &[]);
    let (class_b, _) = seed_class(&mut sidecar, "7B", &[]);
    let template = sidecar.ok("timetable.templateCreate", json!({ "name": "Autumn" }));
    let template_id = str_at(&template, "/templateId").to_string();
    let _first = slot(&mut sidecar, &template_id, &class_a, "mon 08:00", "R1");
    let second = slot(&mut sidecar, &template_id, &class_b, "tue 08:00", "R1");

    let view = sidecar.ok(
        "sheet.open",
        json!({ "scope": { "kind": "timetable", "templateId": template_id } }),
    );
    let sheet_id = str_at(&view, "/sheetId").to_string();
    assert_eq!(row_field(&view, &second, "room"), &json!("R1"));

    sidecar.ok(
        "sheet.setField",
        json!({ "sheetId": sheet_id, "rowId": second, "field": "time_slot", "value": "mon 08:00" }),
    );
    let failed = sidecar.ok("sheet.save", json!({ "sheetId": sheet_id }));
    assert_eq!(str_at(&failed, "/status"), "failed", "{failed}");
    assert_eq!(str_at(&failed, "/code"), "validation_failed");
    assert_eq!(failed.get("refetchRequired").and_then(|v| v.as_bool()), Some(false));
    let issues = failed.get("issues").and_then(|v| v.as_array()).expect("issues");
    assert_eq!(issues.len(), 1, "{failed}");
    assert_eq!(issues[0].get("rowId").and_then(|v| v.as_str()), Some(second.as_str()));
    assert_eq!(issues[0].get("field").and_then(|v| v.as_str()), Some("room"));

    // The rejected edit is still pending and still visible.
    assert_eq!(failed.pointer("/view/pendingCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(row_field(&failed["view"], &second, "time_slot"), &json!("mon 08:00"));

    sidecar.ok(
        "sheet.setField",
        json!({ "sheetId": sheet_id, "rowId": second, "field": "room", "value": "R2" }),
    );
    let saved = sidecar.ok("sheet.save", json!({ "sheetId": sheet_id }));
    assert_eq!(str_at(&saved, "/status"), "saved", "{saved}");
    assert_eq!(row_field(&saved["view"], &second, "time_slot"), &json!("mon 08:00"));
    assert_eq!(row_field(&saved["view"], &second, "room"), &json!("R2"));
}

#[test]
fn class_double_booking_and_unknown_class_are_reported() {
    let (mut sidecar, _workspace) = Sidecar::with_workspace("main");
    let (class_a, _) = seed_class(&mut sidecar, "7C", &[]);
    let template = sidecar.ok("timetable.templateCreate", json!({ "name": "Spring" }));
    let template_id = str_at(&template, "/templateId").to_string();
    let _first = slot(&mut sidecar, &template_id, &class_a, "wed 10:00", "R1");
    let second = slot(&mut sidecar, &template_id, &class_a, "thu 10:00", "R2");

    let view = sidecar.ok(
        "sheet.open",
        json!({ "scope": { "kind": "timetable", "templateId": template_id } }),
    );
    let sheet_id = str_at(&view, "/sheetId").to_string();

    sidecar.ok(
        "sheet.setField",
        json!({ "sheetId": sheet_id, "rowId": second, "field": "time_slot", "value": "wed 10:00" }),
    );
    let failed = sidecar.ok("sheet.save", json!({ "sheetId": sheet_id }));
    assert_eq!(str_at(&failed, "/code"), "validation_failed");
    assert_eq!(failed.pointer("/issues/0/field").and_then(|v| v.as_str()), Some("class_id"));

    sidecar.ok("sheet.discard", json!({ "sheetId": sheet_id, "rowId": second }));
    sidecar.ok(
        "sheet.setField",
        json!({
            "sheetId": sheet_id,
            "rowId": second,
            "field": "class_id",
            "value": "no-such-class"
        }),
    );
    let failed = sidecar.ok("sheet.save", json!({ "sheetId": sheet_id }));
    assert_eq!(str_at(&failed, "/code"), "validation_failed");
    assert_eq!(failed.pointer("/issues/0/field").and_then(|v| v.as_str()), Some("class_id"));

    assert_eq!(
        sidecar.err_code(
            "sheet.setField",
            json!({ "sheetId": sheet_id, "rowId": second, "field": "time_slot", "value": "" }),
        ),
        "invalid_value"
    );
}
