use axum::{
    async_trait,
    body::Bytes,
    extract::{
        multipart::MultipartRejection, DefaultBodyLimit, FromRequest, FromRequestParts,
        Multipart, Path, Query, Request, State,
    },
    http::{request::Parts, HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ActionResponse, IpcrError};
use super::evidence::{EvidenceUpload, SignedUrl};
use super::lifecycle::{FormCreated, FormDetail};
use super::types::{
    Attachment, Caller, FormFilter, Indicator, IndicatorPatch, NewIndicator, PerformanceForm,
    RatingCycle, Role,
};
use crate::core::shared::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const DIVISION_ID_HEADER: &str = "x-division-id";

type ApiResult<T> = Result<Json<ActionResponse<T>>, IpcrError>;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Identity forwarded by the upstream gateway. Any missing or malformed
/// header means there is no usable caller.
#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = IpcrError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(&parts.headers, USER_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(IpcrError::Unauthorized)?;
        let role = header_str(&parts.headers, USER_ROLE_HEADER)
            .and_then(|v| v.parse::<Role>().ok())
            .ok_or(IpcrError::Unauthorized)?;
        let division_id = match header_str(&parts.headers, DIVISION_ID_HEADER) {
            Some(v) => Some(Uuid::parse_str(v).map_err(|_| IpcrError::Unauthorized)?),
            None => None,
        };

        Ok(Caller::new(user_id, role, division_id))
    }
}

/// `Json` whose rejection is reported through the action envelope.
pub struct IpcrJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for IpcrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = IpcrError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// JSON body that may be left out entirely. A present but malformed body is
/// still rejected.
pub struct OptionalJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = IpcrError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }
        serde_json::from_slice(&bytes)
            .map(|value| Self(Some(value)))
            .map_err(|e| IpcrError::Validation(format!("Invalid request body: {e}")))
    }
}

pub struct IpcrPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for IpcrPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = IpcrError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

pub struct IpcrQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for IpcrQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = IpcrError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

pub fn configure_ipcr_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    // Room for multipart framing on top of the largest accepted file, so
    // oversized files reach the quota manager and get a proper message.
    let upload_body_limit = max_upload_bytes.saturating_mul(2).saturating_add(64 * 1024);

    Router::new()
        .route("/api/ipcr/cycles/active", get(get_active_cycle))
        .route("/api/ipcr/forms", post(create_form).get(list_forms))
        .route("/api/ipcr/forms/:id", get(get_form))
        .route("/api/ipcr/forms/:id/indicators", post(add_indicator))
        .route(
            "/api/ipcr/indicators/:id",
            put(update_indicator).delete(remove_indicator),
        )
        .route("/api/ipcr/forms/:id/submit", post(submit_form))
        .route("/api/ipcr/forms/:id/endorse", post(endorse_form))
        .route("/api/ipcr/forms/:id/return", post(return_form))
        .route("/api/ipcr/forms/:id/finalize", post(finalize_form))
        .route(
            "/api/ipcr/forms/:id/attachments",
            get(list_attachments)
                .post(upload_attachment)
                .layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/api/ipcr/attachments/:id", delete(delete_attachment))
        .route("/api/ipcr/attachments/:id/url", get(attachment_url))
}

pub async fn get_active_cycle(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> ApiResult<Option<RatingCycle>> {
    let cycle = state.lifecycle.active_cycle().await?;
    Ok(Json(ActionResponse::ok(cycle)))
}

pub async fn create_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<(StatusCode, Json<ActionResponse<FormCreated>>), IpcrError> {
    let created = state.lifecycle.create_form(&caller).await?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ActionResponse::ok(created))))
}

pub async fn list_forms(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrQuery(filter): IpcrQuery<FormFilter>,
) -> ApiResult<Vec<PerformanceForm>> {
    let forms = state.lifecycle.list_forms(&caller, filter).await?;
    Ok(Json(ActionResponse::ok(forms)))
}

pub async fn get_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
) -> ApiResult<FormDetail> {
    let detail = state.lifecycle.get_form(&caller, form_id).await?;
    Ok(Json(ActionResponse::ok(detail)))
}

pub async fn add_indicator(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
    IpcrJson(new): IpcrJson<NewIndicator>,
) -> ApiResult<Indicator> {
    let indicator = state.lifecycle.add_indicator(&caller, form_id, new).await?;
    Ok(Json(ActionResponse::ok(indicator)))
}

pub async fn update_indicator(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(indicator_id): IpcrPath<Uuid>,
    IpcrJson(patch): IpcrJson<IndicatorPatch>,
) -> ApiResult<Indicator> {
    let indicator = state
        .lifecycle
        .update_indicator(&caller, indicator_id, patch)
        .await?;
    Ok(Json(ActionResponse::ok(indicator)))
}

pub async fn remove_indicator(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(indicator_id): IpcrPath<Uuid>,
) -> ApiResult<Uuid> {
    state.lifecycle.remove_indicator(&caller, indicator_id).await?;
    Ok(Json(ActionResponse::ok(indicator_id)))
}

pub async fn submit_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
) -> ApiResult<PerformanceForm> {
    let form = state.lifecycle.submit(&caller, form_id).await?;
    Ok(Json(ActionResponse::ok(form)))
}

pub async fn endorse_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
) -> ApiResult<PerformanceForm> {
    let form = state.lifecycle.endorse(&caller, form_id).await?;
    Ok(Json(ActionResponse::ok(form)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReturnRequest {
    pub remarks: Option<String>,
}

pub async fn return_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
    OptionalJson(body): OptionalJson<ReturnRequest>,
) -> ApiResult<PerformanceForm> {
    let remarks = body.and_then(|req| req.remarks);
    let form = state.lifecycle.return_form(&caller, form_id, remarks).await?;
    Ok(Json(ActionResponse::ok(form)))
}

pub async fn finalize_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
) -> ApiResult<PerformanceForm> {
    let form = state.lifecycle.finalize(&caller, form_id).await?;
    Ok(Json(ActionResponse::ok(form)))
}

pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
) -> ApiResult<Vec<Attachment>> {
    let attachments = state.evidence.list_attachments(&caller, form_id).await?;
    Ok(Json(ActionResponse::ok(attachments)))
}

/// Multipart fields: `file` (required) and `indicator_id` (optional; absent
/// means a form-level attachment).
pub async fn upload_attachment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(form_id): IpcrPath<Uuid>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Attachment> {
    let mut multipart = multipart?;
    let mut upload: Option<EvidenceUpload> = None;
    let mut indicator_id: Option<Uuid> = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("evidence").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(invalid_upload)?;
                upload = Some(EvidenceUpload {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "indicator_id" | "indicatorId" => {
                let text = field.text().await.map_err(invalid_upload)?;
                let text = text.trim();
                if !text.is_empty() {
                    indicator_id = Some(Uuid::parse_str(text).map_err(|_| {
                        IpcrError::Validation("indicator_id is not a valid id".to_string())
                    })?);
                }
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| IpcrError::Validation("Missing file field".to_string()))?;
    let attachment = state
        .evidence
        .upload(&caller, form_id, indicator_id, upload)
        .await?;
    Ok(Json(ActionResponse::ok(attachment)))
}

fn invalid_upload(e: axum::extract::multipart::MultipartError) -> IpcrError {
    IpcrError::Validation(format!("Invalid upload: {}", e.body_text()))
}

pub async fn delete_attachment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(attachment_id): IpcrPath<Uuid>,
) -> ApiResult<Uuid> {
    state.evidence.delete(&caller, attachment_id).await?;
    Ok(Json(ActionResponse::ok(attachment_id)))
}

pub async fn attachment_url(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    IpcrPath(attachment_id): IpcrPath<Uuid>,
) -> ApiResult<SignedUrl> {
    let url = state.evidence.download_url(&caller, attachment_id).await?;
    Ok(Json(ActionResponse::ok(url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<Caller, IpcrError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_from_headers() {
        let user = Uuid::new_v4();
        let division = Uuid::new_v4();
        let caller = extract(
            Request::builder()
                .header(USER_ID_HEADER, user.to_string())
                .header(USER_ROLE_HEADER, "divisionChief")
                .header(DIVISION_ID_HEADER, division.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(caller, Caller::new(user, Role::DivisionChief, Some(division)));
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let err = extract(Request::builder().header(USER_ROLE_HEADER, "employee"))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcrError::Unauthorized));

        let err = extract(
            Request::builder()
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .header(USER_ROLE_HEADER, "superuser"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IpcrError::Unauthorized));
    }
}
