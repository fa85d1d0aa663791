use crate::db;
use crate::detect::Detector;
use crate::types::Vehicle;
use bytes::Buf;
use futures::StreamExt;
use log::{debug, error, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::{Json, WithStatus};
use warp::Filter;

const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

type Reply = WithStatus<Json>;

pub fn routes(
    detector: Arc<Detector>,
    db_conn: Arc<Mutex<Connection>>,
) -> impl Filter<Extract = (Reply,), Error = warp::Rejection> + Clone {
    let with_db = warp::any().map(move || db_conn.clone());

    let detect = warp::post()
        .and(warp::path!("detect"))
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(warp::any().map(move || detector.clone()))
        .and_then(handle_detect);
    let list_scans = warp::get()
        .and(warp::path!("scans"))
        .and(with_db.clone())
        .and_then(handle_list_scans);
    let verify_scan = warp::post()
        .and(warp::path!("scans" / i64 / "verify"))
        .and(warp::body::json())
        .and(with_db.clone())
        .and_then(handle_verify_scan);
    let register_vehicle = warp::post()
        .and(warp::path!("vehicles"))
        .and(warp::body::json())
        .and(with_db)
        .and_then(handle_register_vehicle);

    detect
        .or(list_scans)
        .unify()
        .or(verify_scan)
        .unify()
        .or(register_vehicle)
        .unify()
}

fn reply<T: Serialize>(body: &T, status: StatusCode) -> Reply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(status: StatusCode, message: &str) -> Reply {
    reply(&json!({ "error": message }), status)
}

fn internal_error() -> Reply {
    error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

struct Upload {
    filename: Option<String>,
    data: Vec<u8>,
}

/// Pulls the `file` part out of the form; other parts are skipped.
async fn read_upload(mut form: FormData) -> Result<Option<Upload>, warp::Error> {
    let mut upload = None;
    while let Some(part) = form.next().await {
        let part = part?;
        debug!("Got part {}", part.name());
        if part.name() != "file" {
            warn!("Ignoring part {}", part.name());
            continue;
        }
        let filename = part.filename().map(str::to_string);
        let mut data: Vec<u8> = vec![];
        let mut stream = part.stream();
        while let Some(buf) = stream.next().await {
            data.extend_from_slice(buf?.bytes());
        }
        upload = Some(Upload { filename, data });
    }
    Ok(upload)
}

async fn handle_detect(form: FormData, detector: Arc<Detector>) -> Result<Reply, Infallible> {
    let upload = match read_upload(form).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Ok(error_reply(StatusCode::BAD_REQUEST, "No file uploaded")),
        Err(e) => {
            warn!("Error reading upload: {:?}", e);
            return Ok(error_reply(StatusCode::BAD_REQUEST, "Malformed upload"));
        }
    };
    if upload.filename.as_deref() == Some("") {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "Empty filename"));
    }

    Ok(match detector.detect(&upload.data).await {
        Ok(response) => reply(&response, StatusCode::OK),
        Err(e) if e.is_input_error() => error_reply(StatusCode::BAD_REQUEST, &e.to_string()),
        // Already logged with full detail by the detector.
        Err(_) => internal_error(),
    })
}

async fn handle_list_scans(db_conn: Arc<Mutex<Connection>>) -> Result<Reply, Infallible> {
    let conn = db_conn.lock().await;
    Ok(match db::list_scans(&conn) {
        Ok(scans) => reply(&scans, StatusCode::OK),
        Err(e) => {
            error!("Error listing scans: {:?}", e);
            internal_error()
        }
    })
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    status: String,
}

async fn handle_verify_scan(
    id: i64,
    request: VerifyRequest,
    db_conn: Arc<Mutex<Connection>>,
) -> Result<Reply, Infallible> {
    let conn = db_conn.lock().await;
    Ok(match db::verify_scan(&conn, id, &request.status) {
        Ok(true) => reply(
            &json!({ "message": "Scan updated", "id": id, "status": request.status }),
            StatusCode::OK,
        ),
        Ok(false) => error_reply(StatusCode::NOT_FOUND, "Scan not found"),
        Err(e) => {
            error!("Unable to set status for scan {}: {:?}", id, e);
            internal_error()
        }
    })
}

async fn handle_register_vehicle(
    vehicle: Vehicle,
    db_conn: Arc<Mutex<Connection>>,
) -> Result<Reply, Infallible> {
    let conn = db_conn.lock().await;
    Ok(match db::register_vehicle(&conn, &vehicle) {
        Ok(id) => reply(&json!({ "id": id }), StatusCode::CREATED),
        Err(ref e) if db::is_constraint_violation(e) => {
            error_reply(StatusCode::CONFLICT, "Plate already registered")
        }
        Err(e) => {
            error!("Unable to register plate {}: {:?}", vehicle.plate_number, e);
            internal_error()
        }
    })
}
