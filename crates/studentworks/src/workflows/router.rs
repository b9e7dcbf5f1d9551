use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use bytes::Bytes;
use futures::TryStreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use super::applications::{
    ApplicantContact, ApplicationId, ApplicationStatus, ApplicationStatusView, ApplicationStore,
};
use super::attachments::{AttachmentContent, Upload};
use super::board::Board;
use super::moderation::Actor;
use super::submissions::{
    ModerationStatus, Submission, SubmissionId, SubmissionKind, SubmissionPayload,
    SubmissionStore, SubmissionView,
};
use super::validation::ValidationError;
use crate::error::{FailureKind, TaggedFailure};

/// Header carrying the signed-in user's e-mail, set by the identity proxy.
pub const USER_HEADER: &str = "x-user-email";

/// Room for a base64 encoded 10 MB administrative upload plus the JSON around it.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Tagged failure rendered as `{"error", "kind"}` with the matching status code.
#[derive(Debug)]
pub struct ApiFailure {
    kind: FailureKind,
    message: String,
}

impl ApiFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl<E> From<E> for ApiFailure
where
    E: TaggedFailure,
{
    fn from(value: E) -> Self {
        Self::new(value.kind(), value.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let payload = json!({
            "error": self.message,
            "kind": self.kind,
        });
        (self.kind.status_code(), Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(FailureKind::Validation, rejection.body_text())
    }
}

/// `Json` whose rejections render through `ApiFailure` like every other error.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiFailure;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

/// File carried inline in a JSON body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadBody {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Standard base64.
    pub data: String,
}

impl UploadBody {
    fn decode(self) -> Result<Upload, ValidationError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.data.trim())
            .map_err(|_| ValidationError::new("attachment", "data must be base64"))?;
        Ok(Upload::new(
            self.file_name,
            self.content_type.as_deref(),
            Bytes::from(bytes),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    pub payload: SubmissionPayload,
    #[serde(default)]
    pub attachment: Option<UploadBody>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationRequest {
    pub contact: ApplicantContact,
    #[serde(default)]
    pub attachment: Option<UploadBody>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApplicantEntry {
    applicant_number: usize,
    #[serde(flatten)]
    application: ApplicationStatusView,
}

/// JSON surface over intake, moderation, applications, and attachments.
pub fn board_router<S, A>(board: Arc<Board<S, A>>) -> Router
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    Router::new()
        .route("/api/v1/submissions", post(create_submission::<S, A>))
        .route("/api/v1/submissions/:id", get(get_submission::<S, A>))
        .route(
            "/api/v1/submissions/:id/attachment",
            get(submission_attachment::<S, A>),
        )
        .route(
            "/api/v1/submissions/:id/files",
            post(attach_submission_file::<S, A>),
        )
        .route(
            "/api/v1/submissions/:id/files/:file_id",
            get(submission_file::<S, A>),
        )
        .route(
            "/api/v1/submissions/:id/approve",
            post(approve_submission::<S, A>),
        )
        .route(
            "/api/v1/submissions/:id/reject",
            post(reject_submission::<S, A>),
        )
        .route("/api/v1/listings/:kind", get(list_visible::<S, A>))
        .route("/api/v1/moderation/:kind", get(moderation_queue::<S, A>))
        .route(
            "/api/v1/moderation/:kind/reconcile",
            post(reconcile_kind::<S, A>),
        )
        .route(
            "/api/v1/postings/:id/applications",
            post(submit_application::<S, A>).get(list_applications::<S, A>),
        )
        .route("/api/v1/postings/:id/recount", post(recount_posting::<S, A>))
        .route("/api/v1/applications/:id", get(get_application::<S, A>))
        .route(
            "/api/v1/applications/:id/transition",
            post(transition_application::<S, A>),
        )
        .route(
            "/api/v1/applications/:id/attachment",
            get(application_attachment::<S, A>),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(board)
}

fn actor(headers: &HeaderMap) -> Option<Actor> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(Actor::new)
}

fn signed_in(headers: &HeaderMap) -> ApiResult<Actor> {
    actor(headers).ok_or_else(|| {
        ApiFailure::new(
            FailureKind::Forbidden,
            format!("{USER_HEADER} header is required"),
        )
    })
}

fn parse_kind(raw: &str) -> Result<SubmissionKind, ValidationError> {
    raw.parse()
        .map_err(|err| ValidationError::new("kind", format!("{err}")))
}

fn parse_status<T>(raw: Option<&str>) -> Result<Option<T>, ValidationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse()
                .map_err(|err| ValidationError::new("status", format!("{err}")))
        })
        .transpose()
}

fn views(submissions: Vec<Submission>) -> Vec<SubmissionView> {
    submissions.iter().map(Submission::view).collect()
}

fn attachment_response(content: AttachmentContent) -> Response {
    (
        [(header::CONTENT_TYPE, content.content_type)],
        content.bytes,
    )
        .into_response()
}

async fn create_submission<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<SubmissionRequest>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let upload = request.attachment.map(UploadBody::decode).transpose()?;
    let submitted_by = actor(&headers).map(|actor| actor.email);
    let submission = board
        .intake()
        .submit(request.payload, upload, submitted_by)
        .await?;
    Ok((StatusCode::CREATED, Json(submission.view())).into_response())
}

async fn get_submission<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SubmissionView>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = actor(&headers);
    let submission = board
        .submission_for(actor.as_ref(), &SubmissionId(id))
        .await?;
    Ok(Json(submission.view()))
}

async fn submission_attachment<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = actor(&headers);
    let content = board
        .submission_attachment(actor.as_ref(), &SubmissionId(id))
        .await?;
    Ok(attachment_response(content))
}

async fn attach_submission_file<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(upload): ApiJson<UploadBody>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let upload = upload.decode()?;
    let submission = board
        .attach_file(&actor, &SubmissionId(id), upload)
        .await?;
    Ok((StatusCode::CREATED, Json(submission.view())).into_response())
}

async fn submission_file<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path((id, file_id)): Path<(String, String)>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = actor(&headers);
    let content = board
        .submission_file(actor.as_ref(), &SubmissionId(id), &file_id)
        .await?;
    Ok(attachment_response(content))
}

async fn approve_submission<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SubmissionView>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let submission = board
        .moderation()
        .approve(&actor, &SubmissionId(id))
        .await?;
    Ok(Json(submission.view()))
}

async fn reject_submission<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<NoteRequest>>,
) -> ApiResult<Json<SubmissionView>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let note = body.and_then(|Json(request)| request.note);
    let submission = board
        .moderation()
        .reject(&actor, &SubmissionId(id), note)
        .await?;
    Ok(Json(submission.view()))
}

async fn list_visible<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<SubmissionView>>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let kind = parse_kind(&kind)?;
    let submissions: Vec<Submission> = board.moderation().list_visible(kind).try_collect().await?;
    Ok(Json(views(submissions)))
}

async fn moderation_queue<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<SubmissionView>>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let kind = parse_kind(&kind)?;
    let status = parse_status::<ModerationStatus>(query.status.as_deref())?;
    let submissions: Vec<Submission> = board
        .moderation()
        .list_by_kind(&actor, kind, status)?
        .try_collect()
        .await?;
    Ok(Json(views(submissions)))
}

async fn reconcile_kind<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(kind): Path<String>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    board.moderators().authorize(&actor)?;
    let kind = parse_kind(&kind)?;
    let summary = board.applications().reconcile_all(kind).await?;
    Ok(Json(summary).into_response())
}

async fn submit_application<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    Path(posting_id): Path<String>,
    ApiJson(request): ApiJson<ApplicationRequest>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let upload = request.attachment.map(UploadBody::decode).transpose()?;
    let application = board
        .applications()
        .submit_with_upload(SubmissionId(posting_id), request.contact, upload)
        .await?;
    Ok((StatusCode::CREATED, Json(application.status_view())).into_response())
}

async fn list_applications<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(posting_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<ApplicantEntry>>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let status = parse_status::<ApplicationStatus>(query.status.as_deref())?;
    let posting_id = SubmissionId(posting_id);

    // Numbering follows the full list so a filter does not renumber applicants.
    let all = board
        .applications()
        .list_by_posting(&actor, &posting_id, None)
        .await?;
    let entries = all
        .iter()
        .enumerate()
        .filter(|(_, application)| status.map_or(true, |wanted| application.status == wanted))
        .map(|(index, application)| ApplicantEntry {
            applicant_number: index + 1,
            application: application.status_view(),
        })
        .collect();
    Ok(Json(entries))
}

async fn recount_posting<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(posting_id): Path<String>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    board.moderators().authorize(&actor)?;
    let posting_id = SubmissionId(posting_id);
    let count = board.applications().recount(&posting_id).await?;
    let payload = json!({
        "posting_id": posting_id,
        "applicant_count": count,
    });
    Ok(Json(payload).into_response())
}

async fn get_application<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApplicationStatusView>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let application = board
        .application_for(&actor, &ApplicationId(id))
        .await?;
    Ok(Json(application.status_view()))
}

async fn transition_application<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<TransitionRequest>,
) -> ApiResult<Json<ApplicationStatusView>>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let status = parse_status::<ApplicationStatus>(Some(request.status.as_str()))?
        .ok_or_else(|| ValidationError::new("status", "is required"))?;
    let application = board
        .applications()
        .transition(&actor, &ApplicationId(id), status, request.note)
        .await?;
    Ok(Json(application.status_view()))
}

async fn application_attachment<S, A>(
    State(board): State<Arc<Board<S, A>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    let actor = signed_in(&headers)?;
    let content = board
        .application_attachment(&actor, &ApplicationId(id))
        .await?;
    Ok(attachment_response(content))
}
