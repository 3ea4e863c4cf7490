use actix_web::http::StatusCode;
use actix_web::{error, web, HttpResponse};
use campusdb::auth::{NewUser, UserFilter};
use campusdb::response::Envelope;
use campusdb::services::{
    AdmissionFilter, AllocationFilter, CourseFilter, ExamFilter, FeeStructureFilter, ItemFilter,
    PaymentFilter, RoomFilter, StatusChange, StudentFilter,
};
use campusdb::{AuditFilter, CampusError, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        log::debug!("Rejected request body: {err}");
        let body = bad_request("Invalid JSON request body");
        error::InternalError::from_response(err, body).into()
    }))
    .service(
        web::scope("/api")
            .route("/status", web::get().to(status))
            // Auth
            .route("/auth/login", web::post().to(login))
            .route("/auth/register", web::post().to(create_user))
            .route("/auth/change-password", web::post().to(change_password))
            // Users
            .route("/users", web::get().to(list_users))
            .route("/users/profile", web::get().to(user_profile))
            .route("/users/create", web::post().to(create_user))
            .route("/users/update", web::post().to(update_user))
            .route("/users/delete", web::post().to(delete_user))
            // Admissions
            .route("/admissions", web::get().to(list_admissions))
            .route("/admissions/stats", web::get().to(admission_stats))
            .route("/admissions/my", web::get().to(my_admissions))
            .route("/admissions/create", web::post().to(create_admission))
            .route("/admissions/update", web::post().to(update_admission))
            .route("/admissions/update-status", web::post().to(update_admission_status))
            .route("/admissions/admit-student", web::post().to(admit_student))
            .route("/admissions/delete", web::post().to(delete_admission))
            // Audit
            .route("/audit/logs", web::get().to(audit_logs))
            // Students
            .route("/students", web::get().to(list_students))
            .route("/students/stats", web::get().to(student_stats))
            .route("/students/{id}", web::get().to(get_student))
            .route("/students/{id}/courses", web::get().to(student_courses))
            // Courses and exams
            .route("/courses", web::get().to(list_courses))
            .route("/courses/{id}", web::get().to(get_course))
            .route("/courses/{id}/enrollments", web::get().to(course_enrollments))
            .route("/exams", web::get().to(list_exams))
            .route("/exams/stats", web::get().to(exam_stats))
            .route("/exams/{id}", web::get().to(get_exam))
            .route("/exams/{id}/marks", web::get().to(exam_marks))
            // Fees
            .route("/fees/structures", web::get().to(fee_structures))
            .route("/fees/payments", web::get().to(payments))
            .route("/fees/stats", web::get().to(fee_stats))
            .route("/fees/students/{id}", web::get().to(student_fee_summary))
            // Hostel
            .route("/hostel/rooms", web::get().to(rooms))
            .route("/hostel/allocations", web::get().to(allocations))
            .route("/hostel/stats", web::get().to(hostel_stats))
            // Library
            .route("/library/items", web::get().to(library_items))
            .route("/library/overdue", web::get().to(overdue_items))
            // Notifications
            .route("/notifications", web::get().to(notifications))
            .route("/notifications/unread", web::get().to(unread_notifications))
            // Dashboard
            .route("/dashboard/stats", web::get().to(dashboard_stats))
            .route("/dashboard/students/{id}", web::get().to(student_dashboard))
            .route("/dashboard/activity", web::get().to(recent_activity))
            .route("/dashboard/health", web::get().to(system_health))
            .route("/dashboard/trends", web::get().to(admission_trends)),
    );
}

// ── Helpers ─────────────────────────────────────────────────────────

fn respond<T: Serialize>(result: campusdb::Result<T>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(Envelope::ok(data)),
        Err(e) => err_response(&e),
    }
}

/// Run a store call that hashes passwords on the blocking thread pool.
async fn blocking<T, F>(f: F) -> HttpResponse
where
    F: FnOnce() -> campusdb::Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match web::block(f).await {
        Ok(result) => respond(result),
        Err(e) => err_response(&CampusError::Other(format!("Blocking task failed: {e}"))),
    }
}

fn err_response(e: &CampusError) -> HttpResponse {
    let body = Envelope::<Value>::from_error(e);
    let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(body)
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(Envelope::<Value>::error(400, message))
}

fn done() -> campusdb::Result<serde_json::Value> {
    Ok(serde_json::json!({ "success": true }))
}

/// Remove a string id from a request body, leaving the rest as a patch.
fn take_id(body: &mut Record, key: &str) -> String {
    body.remove(key)
        .map(|v| campusdb::util::cell_text(&v))
        .unwrap_or_default()
}

// ── Request bodies and queries ─────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChangePasswordRequest {
    pub user_id: String,
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IdRequest {
    pub user_id: String,
    pub admission_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusRequest {
    pub admission_id: String,
    #[serde(flatten)]
    pub change: StatusChange,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdmitRequest {
    pub admission_id: String,
    pub student_data: Record,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserQuery {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub recipient: Option<String>,
    pub limit: Option<usize>,
    pub days: Option<u32>,
}

// ── Status ──────────────────────────────────────────────────────────

async fn status(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.stats())
}

// ── Auth and users ──────────────────────────────────────────────────

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> HttpResponse {
    let body = body.into_inner();
    blocking(move || state.store.users().login(&body.email, &body.password)).await
}

async fn create_user(state: web::Data<AppState>, body: web::Json<NewUser>) -> HttpResponse {
    let user = body.into_inner();
    blocking(move || state.store.users().create_user(&user)).await
}

async fn change_password(
    state: web::Data<AppState>,
    body: web::Json<ChangePasswordRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    blocking(move || {
        state
            .store
            .users()
            .change_password(&body.user_id, &body.old_password, &body.new_password)
            .and_then(|_| done())
    })
    .await
}

async fn list_users(state: web::Data<AppState>, query: web::Query<UserFilter>) -> HttpResponse {
    respond(state.store.users().get_all_users(&query))
}

async fn user_profile(state: web::Data<AppState>, query: web::Query<UserQuery>) -> HttpResponse {
    match query.user_id.as_deref() {
        Some(id) if !id.is_empty() => respond(state.store.users().get_user(id)),
        _ => bad_request("user_id parameter required"),
    }
}

async fn update_user(state: web::Data<AppState>, body: web::Json<Record>) -> HttpResponse {
    let mut patch = body.into_inner();
    let user_id = take_id(&mut patch, "user_id");
    blocking(move || state.store.users().update_user(&user_id, &patch)).await
}

async fn delete_user(state: web::Data<AppState>, body: web::Json<IdRequest>) -> HttpResponse {
    respond(state.store.users().delete_user(&body.user_id).and_then(|_| done()))
}

// ── Admissions ──────────────────────────────────────────────────────

async fn list_admissions(
    state: web::Data<AppState>,
    query: web::Query<AdmissionFilter>,
) -> HttpResponse {
    respond(state.store.admissions().list(&query))
}

async fn admission_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.admissions().stats())
}

async fn my_admissions(state: web::Data<AppState>, query: web::Query<UserQuery>) -> HttpResponse {
    match query.email.as_deref() {
        Some(email) if !email.is_empty() => respond(state.store.admissions().by_email(email)),
        _ => bad_request("Email parameter required"),
    }
}

async fn create_admission(state: web::Data<AppState>, body: web::Json<Record>) -> HttpResponse {
    respond(state.store.admissions().create(&body))
}

async fn update_admission(state: web::Data<AppState>, body: web::Json<Record>) -> HttpResponse {
    let mut patch = body.into_inner();
    let admission_id = take_id(&mut patch, "admission_id");
    respond(state.store.admissions().update(&admission_id, &patch))
}

async fn update_admission_status(
    state: web::Data<AppState>,
    body: web::Json<StatusRequest>,
) -> HttpResponse {
    respond(
        state
            .store
            .admissions()
            .update_status(&body.admission_id, &body.change),
    )
}

async fn admit_student(state: web::Data<AppState>, body: web::Json<AdmitRequest>) -> HttpResponse {
    respond(
        state
            .store
            .admissions()
            .admit_student(&body.admission_id, &body.student_data),
    )
}

async fn delete_admission(state: web::Data<AppState>, body: web::Json<IdRequest>) -> HttpResponse {
    respond(
        state
            .store
            .admissions()
            .delete(&body.admission_id)
            .and_then(|_| done()),
    )
}

// ── Audit ───────────────────────────────────────────────────────────

async fn audit_logs(state: web::Data<AppState>, query: web::Query<AuditFilter>) -> HttpResponse {
    respond(state.store.audit().logs(&query))
}

// ── Students, courses and exams ─────────────────────────────────────

async fn list_students(state: web::Data<AppState>, query: web::Query<StudentFilter>) -> HttpResponse {
    respond(state.store.students().list(&query))
}

async fn student_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.students().stats())
}

async fn get_student(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.students().get(&path))
}

async fn student_courses(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.students().courses(&path))
}

async fn list_courses(state: web::Data<AppState>, query: web::Query<CourseFilter>) -> HttpResponse {
    respond(state.store.courses().timetable(&query))
}

async fn get_course(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.courses().get(&path))
}

async fn course_enrollments(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.courses().enrollments(&path))
}

async fn list_exams(state: web::Data<AppState>, query: web::Query<ExamFilter>) -> HttpResponse {
    respond(state.store.exams().list(&query))
}

async fn exam_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.exams().stats())
}

async fn get_exam(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.exams().get(&path))
}

async fn exam_marks(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.exams().marks(&path))
}

// ── Fees ────────────────────────────────────────────────────────────

async fn fee_structures(
    state: web::Data<AppState>,
    query: web::Query<FeeStructureFilter>,
) -> HttpResponse {
    respond(state.store.fees().fee_structures(&query))
}

async fn payments(state: web::Data<AppState>, query: web::Query<PaymentFilter>) -> HttpResponse {
    respond(state.store.fees().payments(&query))
}

async fn fee_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.fees().stats())
}

async fn student_fee_summary(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.fees().student_fee_summary(&path))
}

// ── Hostel and library ──────────────────────────────────────────────

async fn rooms(state: web::Data<AppState>, query: web::Query<RoomFilter>) -> HttpResponse {
    respond(state.store.hostel().rooms(&query))
}

async fn allocations(state: web::Data<AppState>, query: web::Query<AllocationFilter>) -> HttpResponse {
    respond(state.store.hostel().allocations(&query))
}

async fn hostel_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.hostel().stats())
}

async fn library_items(state: web::Data<AppState>, query: web::Query<ItemFilter>) -> HttpResponse {
    respond(state.store.library().items(&query))
}

async fn overdue_items(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.library().overdue())
}

// ── Notifications ───────────────────────────────────────────────────

async fn notifications(state: web::Data<AppState>, query: web::Query<UserQuery>) -> HttpResponse {
    match query.recipient.as_deref() {
        Some(r) if !r.is_empty() => respond(state.store.notifications().for_recipient(r)),
        _ => bad_request("recipient parameter required"),
    }
}

async fn unread_notifications(
    state: web::Data<AppState>,
    query: web::Query<UserQuery>,
) -> HttpResponse {
    match query.recipient.as_deref() {
        Some(r) if !r.is_empty() => respond(
            state
                .store
                .notifications()
                .unread_count(r)
                .map(|unread_count| serde_json::json!({ "unread_count": unread_count })),
        ),
        _ => bad_request("recipient parameter required"),
    }
}

// ── Dashboard ───────────────────────────────────────────────────────

async fn dashboard_stats(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.dashboard().stats())
}

async fn student_dashboard(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    respond(state.store.dashboard().student(&path))
}

async fn recent_activity(state: web::Data<AppState>, query: web::Query<UserQuery>) -> HttpResponse {
    respond(state.store.dashboard().recent_activity(query.limit.unwrap_or(10)))
}

async fn system_health(state: web::Data<AppState>) -> HttpResponse {
    respond(state.store.dashboard().system_health())
}

async fn admission_trends(state: web::Data<AppState>, query: web::Query<UserQuery>) -> HttpResponse {
    respond(state.store.dashboard().admission_trends(query.days.unwrap_or(30)))
}
