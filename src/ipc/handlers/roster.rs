use crate::backend::SessionContext;
use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_value, require_db, require_session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn class_in_branch(
    conn: &Connection,
    ctx: &SessionContext,
    class_id: &str,
) -> Result<(), HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM classes WHERE id = ? AND branch_id = ?",
        (class_id, &ctx.branch_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()?
    .map(|_| ())
    .ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

fn classes_create(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, branch_id, name) VALUES(?, ?, ?)",
        (&class_id, &ctx.branch_id, name.trim()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "classes" }))
    })?;
    Ok(json!({ "classId": class_id }))
}

fn classes_list(conn: &Connection, ctx: &SessionContext) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM classes WHERE branch_id = ? ORDER BY name, id",
    )?;
    let classes = stmt
        .query_map([&ctx.branch_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "classes": classes }))
}

fn students_create(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let student_no = get_optional_str(params, "studentNo");
    class_in_branch(conn, ctx, &class_id)?;

    let next_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    )?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, student_no, active, sort_order)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &class_id,
            last_name.trim(),
            first_name.trim(),
            student_no,
            next_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "studentId": student_id, "sortOrder": next_order }))
}

fn students_set_active(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing active"))?;
    class_in_branch(conn, ctx, &class_id)?;
    let changed = conn.execute(
        "UPDATE students SET active = ? WHERE id = ? AND class_id = ?",
        (i64::from(active), &student_id, &class_id),
    )?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn students_list(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    class_in_branch(conn, ctx, &class_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, student_no, active, sort_order
         FROM students WHERE class_id = ? ORDER BY sort_order",
    )?;
    let students = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "studentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn assessments_create(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let title = get_required_str(params, "title")?;
    let max_score = params
        .get("maxScore")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing maxScore"))?;
    if !(max_score.is_finite() && max_score > 0.0) {
        return Err(HandlerErr::new("bad_params", "maxScore must be > 0")
            .with_details(json!({ "maxScore": max_score })));
    }
    class_in_branch(conn, ctx, &class_id)?;

    let idx: i64 = conn.query_row(
        "SELECT COALESCE(MAX(idx) + 1, 0) FROM assessments WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    )?;
    let assessment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessments(id, class_id, title, max_score, idx) VALUES(?, ?, ?, ?, ?)",
        (&assessment_id, &class_id, title.trim(), max_score, idx),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "assessments" }))
    })?;
    Ok(json!({ "assessmentId": assessment_id, "idx": idx }))
}

fn assessments_list(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    class_in_branch(conn, ctx, &class_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, title, max_score, idx FROM assessments WHERE class_id = ? ORDER BY idx",
    )?;
    let assessments = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "maxScore": r.get::<_, f64>(2)?,
                "idx": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "assessments": assessments }))
}

fn timetable_template_create(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let template_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO timetable_templates(id, branch_id, name) VALUES(?, ?, ?)",
        (&template_id, &ctx.branch_id, name.trim()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "timetable_templates" }))
    })?;
    Ok(json!({ "templateId": template_id }))
}

fn timetable_slot_create(
    conn: &Connection,
    ctx: &SessionContext,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;
    let class_id = get_required_str(params, "classId")?;
    let time_slot = get_required_str(params, "timeSlot")?;
    let subject = get_optional_str(params, "subject");
    let room = get_optional_str(params, "room");
    if time_slot.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "timeSlot must be non-empty"));
    }

    conn.query_row(
        "SELECT 1 FROM timetable_templates WHERE id = ? AND branch_id = ?",
        (&template_id, &ctx.branch_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "timetable template not found"))?;
    class_in_branch(conn, ctx, &class_id)?;

    let next_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM timetable_slots WHERE template_id = ?",
        [&template_id],
        |r| r.get(0),
    )?;
    let slot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO timetable_slots(id, template_id, class_id, time_slot, subject, room, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &template_id,
            &class_id,
            time_slot.trim(),
            subject,
            room,
            next_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "timetable_slots" }))
    })?;
    Ok(json!({ "slotId": slot_id }))
}

fn settings_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = get_required_str(params, "key")?;
    let value = db::settings_get_json(conn, &key)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    Ok(json!({ "key": key, "value": value }))
}

fn settings_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = get_required_str(params, "key")?;
    let value = get_required_value(params, "value")?;
    db::settings_set_json(conn, &key, &value)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    Ok(json!({ "ok": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    match req.method.as_str() {
        "settings.get" => return settings_get(conn, &req.params),
        "settings.set" => return settings_set(conn, &req.params),
        _ => {}
    }

    let ctx = require_session(state.session.as_ref())?;
    match req.method.as_str() {
        "classes.create" => classes_create(conn, ctx, &req.params),
        "classes.list" => classes_list(conn, ctx),
        "students.create" => students_create(conn, ctx, &req.params),
        "students.setActive" => students_set_active(conn, ctx, &req.params),
        "students.list" => students_list(conn, ctx, &req.params),
        "assessments.create" => assessments_create(conn, ctx, &req.params),
        "assessments.list" => assessments_list(conn, ctx, &req.params),
        "timetable.templateCreate" => timetable_template_create(conn, ctx, &req.params),
        "timetable.slotCreate" => timetable_slot_create(conn, ctx, &req.params),
        other => Err(HandlerErr::new(
            "not_implemented",
            format!("unknown method: {}", other),
        )),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create"
        | "classes.list"
        | "students.create"
        | "students.setActive"
        | "students.list"
        | "assessments.create"
        | "assessments.list"
        | "timetable.templateCreate"
        | "timetable.slotCreate"
        | "settings.get"
        | "settings.set" => Some(match dispatch(state, req) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
