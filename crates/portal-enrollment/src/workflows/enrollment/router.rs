use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::attendance::{AttendanceEntry, AttendanceError};
use super::buddies::BuddyError;
use super::checkout::{CheckoutError, PaymentError, PaymentProcessor, SelectionPick};
use super::domain::{
    Actor, EnrollmentId, EnrollmentStatus, NewProgram, ProgramId, ProgramUpdate, SelectionId,
    UserId,
};
use super::lifecycle::{AdmitOutcome, TransitionError};
use super::repository::{PortalBackend, RepositoryError, TransitionPublisher};
use super::roster::RosterError;
use super::service::{EnrollmentPortal, PortalError, RequirementInput};

/// Header carrying the authenticated account id, set by the upstream session layer.
pub const ACTOR_HEADER: &str = "x-portal-user";

type SharedPortal<B, Pay, P> = Arc<EnrollmentPortal<B, Pay, P>>;

/// Router builder exposing the enrollment portal over HTTP.
pub fn enrollment_router<B, Pay, P>(portal: SharedPortal<B, Pay, P>) -> Router
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    Router::new()
        .route("/api/v1/eligibility", get(eligibility_handler::<B, Pay, P>))
        .route(
            "/api/v1/programs",
            get(list_programs_handler::<B, Pay, P>).post(create_program_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id",
            get(program_handler::<B, Pay, P>).patch(update_program_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/availability",
            get(availability_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/reconcile",
            post(reconcile_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/roster",
            get(roster_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/enrollments",
            post(admit_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/buddies/:member_id",
            get(lookup_buddy_handler::<B, Pay, P>)
                .put(assign_buddy_handler::<B, Pay, P>)
                .delete(unassign_buddy_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/leads/:volunteer_id",
            post(toggle_lead_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/attendance",
            get(attendance_days_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/programs/:program_id/attendance/:date",
            get(attendance_sheet_handler::<B, Pay, P>)
                .put(record_attendance_handler::<B, Pay, P>)
                .delete(delete_attendance_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/ledger/reconciliation",
            get(reconcile_all_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id",
            axum::routing::delete(delete_enrollment_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/status",
            post(transition_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/withdraw",
            post(withdraw_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/me/enrollments",
            get(my_enrollments_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/me/attendance",
            get(my_attendance_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/checkout/selections",
            post(select_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/checkout/selections/:selection_id/quote",
            get(quote_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/checkout/selections/:selection_id/payment",
            post(payment_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/checkout/selections/:selection_id/confirm",
            post(confirm_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/settings/enrollment",
            get(settings_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/settings/enrollment/toggle",
            post(toggle_enrollment_handler::<B, Pay, P>),
        )
        .route(
            "/api/v1/settings/requirements",
            get(requirements_handler::<B, Pay, P>).put(upsert_requirement_handler::<B, Pay, P>),
        )
        .with_state(portal)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProgramListQuery {
    #[serde(default)]
    include_archived: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdmitRequest {
    user_id: UserId,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionRequest {
    status: EnrollmentStatus,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuddyRequest {
    volunteer_id: UserId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttendanceRequest {
    entries: Vec<AttendanceEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectionRequest {
    items: Vec<SelectionPick>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfirmRequest {
    #[serde(default)]
    payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToggleEnrollmentRequest {
    expected_version: u64,
    #[serde(default)]
    closure_reason: Option<String>,
}

fn resolve_actor<B, Pay, P>(
    portal: &EnrollmentPortal<B, Pay, P>,
    headers: &HeaderMap,
) -> Result<Actor, PortalError>
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let user_id = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<UserId>().ok())
        .ok_or(PortalError::Unauthenticated)?;
    portal.resolve_actor(&user_id)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, PortalError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub fn error_response(error: PortalError) -> Response {
    let message = error.to_string();
    let (status, payload) = match &error {
        PortalError::Unauthenticated => (StatusCode::UNAUTHORIZED, json!({ "error": message })),
        PortalError::Forbidden
        | PortalError::Transition(TransitionError::Forbidden)
        | PortalError::Buddy(BuddyError::Forbidden)
        | PortalError::Roster(RosterError::Forbidden)
        | PortalError::Attendance(AttendanceError::Forbidden)
        | PortalError::Checkout(CheckoutError::SelectionOwnerMismatch) => {
            (StatusCode::FORBIDDEN, json!({ "error": message }))
        }
        PortalError::NotFound(_)
        | PortalError::Transition(TransitionError::NotFound | TransitionError::ProgramNotFound)
        | PortalError::Buddy(BuddyError::ProgramNotFound | BuddyError::UserNotFound(_))
        | PortalError::Roster(RosterError::ProgramNotFound)
        | PortalError::Attendance(AttendanceError::ProgramNotFound) => {
            (StatusCode::NOT_FOUND, json!({ "error": message }))
        }
        PortalError::Checkout(CheckoutError::Ineligible(report)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": message, "missing_items": report.missing_items }),
        ),
        PortalError::Validation(_)
        | PortalError::Transition(TransitionError::InvalidTransition { .. })
        | PortalError::Buddy(
            BuddyError::NotAMember(_)
            | BuddyError::MemberNotApproved
            | BuddyError::VolunteerNotApproved,
        )
        | PortalError::Attendance(
            AttendanceError::NotApproved(_) | AttendanceError::InvalidEntry(_),
        )
        | PortalError::Checkout(
            CheckoutError::InvalidSelection(_) | CheckoutError::PaymentNotRequired,
        ) => (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": message })),
        PortalError::Checkout(CheckoutError::RejectedBatch(rejected)) => (
            StatusCode::CONFLICT,
            json!({ "error": message, "rejected_programs": rejected }),
        ),
        PortalError::Checkout(
            CheckoutError::SelectionExpired | CheckoutError::PaymentReferenceMismatch,
        )
        | PortalError::Transition(TransitionError::Contention { .. }) => {
            (StatusCode::CONFLICT, json!({ "error": message }))
        }
        PortalError::Checkout(
            CheckoutError::PaymentRequired
            | CheckoutError::PaymentNotSucceeded(_)
            | CheckoutError::PaymentAmountMismatch { .. }
            | CheckoutError::Payment(PaymentError::UnknownReference(_)),
        ) => (StatusCode::PAYMENT_REQUIRED, json!({ "error": message })),
        PortalError::Repository(source)
        | PortalError::Transition(TransitionError::Repository(source))
        | PortalError::Buddy(BuddyError::Repository(source))
        | PortalError::Roster(RosterError::Repository(source))
        | PortalError::Attendance(AttendanceError::Repository(source))
        | PortalError::Checkout(CheckoutError::Repository(source)) => repository_failure(source),
        PortalError::Checkout(CheckoutError::Payment(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        }
    };

    (status, axum::Json(payload)).into_response()
}

fn repository_failure(error: &RepositoryError) -> (StatusCode, serde_json::Value) {
    let message = error.to_string();
    match error {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": message })),
        RepositoryError::VersionConflict { current, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "current_version": current }),
        ),
        RepositoryError::Conflict | RepositoryError::StaleWrite => {
            (StatusCode::CONFLICT, json!({ "error": message }))
        }
        RepositoryError::PreconditionFailed(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": message }))
        }
        RepositoryError::Unavailable(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        }
    }
}

pub(crate) async fn eligibility_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| portal.check_eligibility(&actor));
    respond(StatusCode::OK, result)
}

pub(crate) async fn list_programs_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Query(query): Query<ProgramListQuery>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.list_programs(&actor, query.include_archived));
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_program_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    axum::Json(input): axum::Json<NewProgram>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.create_program(&actor, input));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn program_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|_| portal.program(&program_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn update_program_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
    axum::Json(update): axum::Json<ProgramUpdate>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.update_program(&actor, &program_id, update));
    respond(StatusCode::OK, result)
}

pub(crate) async fn availability_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|_| portal.availability(&program_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn reconcile_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.reconcile(&actor, &program_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn reconcile_all_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| portal.reconcile_all(&actor));
    respond(StatusCode::OK, result)
}

pub(crate) async fn roster_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.program_roster(&actor, &program_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn admit_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
    axum::Json(request): axum::Json<AdmitRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.admit(&actor, &program_id, &request.user_id, request.notes)
    });
    let status = match &result {
        Ok(AdmitOutcome::Created(_)) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    respond(status, result)
}

pub(crate) async fn attendance_days_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(program_id): Path<ProgramId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.attendance_days(&actor, &program_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn attendance_sheet_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, date)): Path<(ProgramId, NaiveDate)>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.attendance_sheet(&actor, &program_id, date));
    respond(StatusCode::OK, result)
}

pub(crate) async fn record_attendance_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, date)): Path<(ProgramId, NaiveDate)>,
    axum::Json(request): axum::Json<AttendanceRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.record_attendance(&actor, &program_id, date, request.entries)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_attendance_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, date)): Path<(ProgramId, NaiveDate)>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.delete_attendance_day(&actor, &program_id, date))
        .map(|deleted| json!({ "date": date, "deleted": deleted }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn my_attendance_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| portal.my_attendance(&actor));
    respond(StatusCode::OK, result)
}

pub(crate) async fn lookup_buddy_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, member_id)): Path<(ProgramId, UserId)>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.lookup_buddy(&actor, &program_id, &member_id))
        .map(|volunteer_id| json!({ "member_id": member_id, "volunteer_id": volunteer_id }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn assign_buddy_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, member_id)): Path<(ProgramId, UserId)>,
    axum::Json(request): axum::Json<BuddyRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.assign_buddy(&actor, &program_id, &member_id, &request.volunteer_id)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn unassign_buddy_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, member_id)): Path<(ProgramId, UserId)>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.unassign_buddy(&actor, &program_id, &member_id))
        .map(|removed| json!({ "removed": removed }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn toggle_lead_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path((program_id, volunteer_id)): Path<(ProgramId, UserId)>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.toggle_lead(&actor, &program_id, &volunteer_id))
        .map(|lead| json!({ "volunteer_id": volunteer_id, "lead": lead }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn transition_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(enrollment_id): Path<EnrollmentId>,
    axum::Json(request): axum::Json<TransitionRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.transition(&actor, &enrollment_id, request.status, request.notes)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn withdraw_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(enrollment_id): Path<EnrollmentId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.withdraw(&actor, &enrollment_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_enrollment_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(enrollment_id): Path<EnrollmentId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.delete_enrollment(&actor, &enrollment_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn my_enrollments_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| portal.my_enrollments(&actor));
    respond(StatusCode::OK, result)
}

pub(crate) async fn select_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<SelectionRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.select(&actor, request.items));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn quote_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(selection_id): Path<SelectionId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.quote(&actor, &selection_id));
    respond(StatusCode::OK, result)
}

pub(crate) async fn payment_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(selection_id): Path<SelectionId>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers)
        .and_then(|actor| portal.begin_payment(&actor, &selection_id));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn confirm_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    Path(selection_id): Path<SelectionId>,
    axum::Json(request): axum::Json<ConfirmRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.confirm(&actor, &selection_id, request.payment_reference.as_deref())
    });
    let status = match &result {
        Ok(receipt) if !receipt.created.is_empty() && !receipt.replayed => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    respond(status, result)
}

pub(crate) async fn settings_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|_| portal.enrollment_settings());
    respond(StatusCode::OK, result)
}

pub(crate) async fn toggle_enrollment_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ToggleEnrollmentRequest>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| {
        portal.toggle_enrollment(&actor, request.expected_version, request.closure_reason)
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn requirements_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result = resolve_actor(&portal, &headers).and_then(|actor| portal.requirements(&actor));
    respond(StatusCode::OK, result)
}

pub(crate) async fn upsert_requirement_handler<B, Pay, P>(
    State(portal): State<SharedPortal<B, Pay, P>>,
    headers: HeaderMap,
    axum::Json(input): axum::Json<RequirementInput>,
) -> Response
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    let result =
        resolve_actor(&portal, &headers).and_then(|actor| portal.upsert_requirement(&actor, input));
    respond(StatusCode::OK, result)
}
