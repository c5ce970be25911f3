use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use common::report::{self, NO_ERRORS_MESSAGE, REPORT_CONTENT_TYPE};
use common::{
    MessageResponse, SubmitResponse, Task, TaskMessage, TaskStatusView, TaskStore, TaskUpdate,
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::internal;
use crate::state::AppState;

/// Tipos de contenido aceptados para la subida.
const CSV_MEDIA_TYPES: [&str; 3] = ["text/csv", "application/csv", "application/vnd.ms-excel"];

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/tasks/upload", post(upload_task))
        .route("/api/v1/tasks/status/:task_id", get(task_status))
        .route("/api/v1/tasks/report/:task_id", get(task_report))
        .route("/api/v1/tasks/events/:task_id", get(task_events))
        .merge(internal::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

fn is_csv(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|media| {
            let media = media.trim().to_ascii_lowercase();
            CSV_MEDIA_TYPES.contains(&media.as_str())
        })
        .unwrap_or(false)
}

/// El id tiene que ser un UUID; se busca tal cual llegó.
fn parse_task_id(raw: &str) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(|_| ())
        .map_err(|_| ApiError::BadRequest(format!("taskId inválido: {}", raw)))
}

async fn find_task(state: &AppState, task_id: &str) -> Result<Task, ApiError> {
    parse_task_id(task_id)?;
    state
        .tasks
        .find_one(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No existe la tarea {}", task_id)))
}

// Guarda el archivo, crea la tarea PENDING y la encola
async fn upload_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if !is_csv(&headers) {
        return Err(ApiError::UnsupportedMediaType(
            "Se espera un archivo CSV (Content-Type: text/csv)".to_string(),
        ));
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest("El archivo está vacío".to_string()));
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(ApiError::internal)?;

    let path = upload_dir.join(format!("{}.csv", task_id));
    tokio::fs::write(&path, &body)
        .await
        .map_err(ApiError::internal)?;
    let file_path = path.to_string_lossy().to_string();

    state
        .tasks
        .create(Task::new(task_id.clone(), file_path.clone()))
        .await?;
    state.enqueue(TaskMessage {
        task_id: task_id.clone(),
        file_path: file_path.clone(),
    });

    info!(
        "tarea {} creada ({} bytes en {})",
        task_id,
        body.len(),
        file_path
    );
    Ok((StatusCode::CREATED, Json(SubmitResponse { task_id })))
}

async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusView>, ApiError> {
    let task = find_task(&state, &task_id).await?;
    Ok(Json(task.status_view()))
}

// Reporte CSV descargable, o un mensaje si no hubo errores
async fn task_report(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task = find_task(&state, &task_id).await?;

    match report::render(&task.task_id, &task.errors).map_err(ApiError::internal)? {
        None => Ok(Json(MessageResponse {
            message: NO_ERRORS_MESSAGE.to_string(),
        })
        .into_response()),
        Some(report) => Ok((
            [
                (header::CONTENT_TYPE, REPORT_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", report.file_name),
                ),
            ],
            report.content,
        )
            .into_response()),
    }
}

// Estado actual y luego cada notificación de la tarea
async fn task_events(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    parse_task_id(&task_id)?;
    // suscribirse antes de leer el estado para no perder eventos
    let rx = state.events.subscribe();
    let task = find_task(&state, &task_id).await?;

    let current = TaskUpdate {
        task_id: task.task_id.clone(),
        status: task.status,
        processed_rows: Some(task.processed_rows),
    };

    // los eventos perdidos por lag se saltan
    let updates = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(update) if update.task_id == task_id => Some(update),
        _ => None,
    });

    let stream = tokio_stream::once(current)
        .chain(updates)
        .map(|update| Event::default().event("task").json_data(update));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_config;
    use axum::{body::Body, http::Request};
    use common::{
        FailureKind, QueuePollResponse, RowError, StoreError, TaskPatch, TaskStatus,
        WorkerRegisterResponse, API_KEY_HEADER,
    };
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    const KEY: &str = "clave";

    fn setup() -> (AppState, Router) {
        let state = AppState::new(test_config());
        let app = build_router(state.clone());
        (state, app)
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json<T: DeserializeOwned>(resp: Response) -> T {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    fn upload(content_type: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/tasks/upload")
            .header(API_KEY_HEADER, KEY)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(API_KEY_HEADER, KEY)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, json: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(API_KEY_HEADER, KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn create_task(state: &AppState) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        state
            .tasks
            .create(Task::new(task_id.clone(), "/tmp/x.csv".to_string()))
            .await
            .unwrap();
        task_id
    }

    #[tokio::test]
    async fn health_no_pide_clave() {
        let (_, app) = setup();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sin_clave_es_401() {
        let (_, app) = setup();
        let req = Request::builder()
            .uri("/api/v1/tasks/status/00000000-0000-0000-0000-000000000000")
            .header(API_KEY_HEADER, "otra")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn subida_crea_tarea_pendiente_y_la_encola() {
        let (state, app) = setup();
        let resp = send(&app, upload("text/csv; charset=utf-8", "id,name\n1,Ana\n")).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let SubmitResponse { task_id } = body_json(resp).await;
        let task = state.tasks.find_one(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(std::path::Path::new(&task.file_path).exists());
        assert_eq!(crate::state::lock(&state.queue).pending_len(), 1);
    }

    #[tokio::test]
    async fn subida_con_tipo_invalido_es_415() {
        let (_, app) = setup();
        let resp = send(&app, upload("application/json", "{}")).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn subida_vacia_es_400() {
        let (_, app) = setup();
        let resp = send(&app, upload("text/csv", "")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn estado_con_id_malformado_o_desconocido() {
        let (_, app) = setup();
        let resp = send(&app, get("/api/v1/tasks/status/no-es-uuid")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let unknown = format!("/api/v1/tasks/status/{}", uuid::Uuid::new_v4());
        assert_eq!(send(&app, get(&unknown)).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn estado_devuelve_la_vista_de_la_tarea() {
        let (state, app) = setup();
        let task_id = create_task(&state).await;

        let resp = send(&app, get(&format!("/api/v1/tasks/status/{}", task_id))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = body_json(resp).await;
        assert_eq!(json["taskId"], task_id.as_str());
        assert_eq!(json["status"], "PENDING");
        assert!(json["errors"].as_array().unwrap().is_empty());
        assert!(json.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn reporte_sin_errores_es_mensaje() {
        let (state, app) = setup();
        let task_id = create_task(&state).await;

        let resp = send(&app, get(&format!("/api/v1/tasks/report/{}", task_id))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let MessageResponse { message } = body_json(resp).await;
        assert_eq!(message, NO_ERRORS_MESSAGE);
    }

    #[tokio::test]
    async fn reporte_con_errores_es_adjunto_csv() {
        let (state, app) = setup();
        let task_id = create_task(&state).await;
        state
            .tasks
            .update_one(&task_id, TaskPatch::status(TaskStatus::InProgress))
            .await
            .unwrap();
        state
            .tasks
            .update_one(
                &task_id,
                TaskPatch::finish(
                    TaskStatus::Completed,
                    vec![RowError::from_failures(2, vec![FailureKind::StatusInvalid])],
                    0,
                ),
            )
            .await
            .unwrap();

        let resp = send(&app, get(&format!("/api/v1/tasks/report/{}", task_id))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            REPORT_CONTENT_TYPE
        );
        let disposition = resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains(&report::report_file_name(&task_id)));

        let text = String::from_utf8(body_bytes(resp).await).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn flujo_interno_de_cola() {
        let (state, app) = setup();
        let resp = send(&app, upload("text/csv", "h\n1,Ana\n")).await;
        let SubmitResponse { task_id } = body_json(resp).await;

        let resp = send(
            &app,
            post_json("/internal/workers/register", serde_json::json!({"hostname": "w"})),
        )
        .await;
        let WorkerRegisterResponse { worker_id } = body_json(resp).await;

        let resp = send(
            &app,
            post_json("/internal/queue/next", serde_json::json!({"worker_id": worker_id})),
        )
        .await;
        let QueuePollResponse { message } = body_json(resp).await;
        assert_eq!(message.map(|m| m.task_id), Some(task_id.clone()));

        let resp = send(
            &app,
            post_json(
                "/internal/queue/ack",
                serde_json::json!({"worker_id": worker_id, "task_id": task_id}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let queue = crate::state::lock(&state.queue);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn nack_agotado_marca_la_tarea_failed() {
        let (state, app) = setup();
        let resp = send(&app, upload("text/csv", "h\n1,Ana\n")).await;
        let SubmitResponse { task_id } = body_json(resp).await;

        let resp = send(
            &app,
            post_json("/internal/workers/register", serde_json::json!({"hostname": "w"})),
        )
        .await;
        let WorkerRegisterResponse { worker_id } = body_json(resp).await;

        // max_delivery_attempts = 2 en la configuración de prueba
        for _ in 0..2 {
            send(
                &app,
                post_json("/internal/queue/next", serde_json::json!({"worker_id": worker_id})),
            )
            .await;
            send(
                &app,
                post_json(
                    "/internal/queue/nack",
                    serde_json::json!({"worker_id": worker_id, "task_id": task_id}),
                ),
            )
            .await;
        }

        let task = state.tasks.find_one(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.errors.last().and_then(|e| e.row), None);
    }

    #[tokio::test]
    async fn transicion_invalida_devuelve_store_error() {
        let (state, app) = setup();
        let task_id = create_task(&state).await;

        let req = Request::builder()
            .method("PATCH")
            .uri(format!("/internal/tasks/{}", task_id))
            .header(API_KEY_HEADER, KEY)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"status":"COMPLETED"}"#))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let err: StoreError = body_json(resp).await;
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
            }
        );
    }

    #[tokio::test]
    async fn reserva_inexistente_es_404() {
        let (_, app) = setup();
        let resp = send(&app, get("/internal/reservations/77")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
