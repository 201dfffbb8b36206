#![cfg(unix)]

use std::fs;
use std::os::unix::prelude::*;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use tempfile::TempDir;
use tower::ServiceExt;
use volinit::config::Config;
use volinit::server::router;

macro_rules! t {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => panic!("{} returned {}", stringify!($e), e),
        }
    };
}

const COOKIE: &str = "s3cr3t";

/// A volume root holding an empty `vol1` volume.
fn volumes() -> TempDir {
    let td = t!(TempDir::new());
    t!(fs::create_dir(td.path().join("vol1")));
    td
}

fn single_file_archive(owner: &Path) -> Vec<u8> {
    let m = t!(owner.metadata());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(u64::from(m.uid()));
    header.set_gid(u64::from(m.gid()));
    header.set_size(5);

    let mut ar = tar::Builder::new(Vec::new());
    t!(ar.append_data(&mut header, "data.bin", &b"hello"[..]));
    t!(ar.into_inner())
}

async fn send(root: &Path, uri: &str, content_type: Option<&str>, body: Vec<u8>) -> Response {
    send_body(root, uri, content_type, Body::from(body)).await
}

async fn send_body(root: &Path, uri: &str, content_type: Option<&str>, body: Body) -> Response {
    let config = Config::new(root, "disk.img", COOKIE);
    let mut request = Request::post(uri);
    if let Some(content_type) = content_type {
        request = request.header(header::CONTENT_TYPE, content_type);
    }
    let request = t!(request.body(body));
    t!(router(Arc::new(config)).oneshot(request).await)
}

/// A streaming body holding `data` that records whether it was ever polled.
fn watched_body(data: Vec<u8>) -> (Body, Arc<AtomicBool>) {
    let polled = Arc::new(AtomicBool::new(false));
    let flag = polled.clone();
    let stream = futures::stream::once(async move {
        flag.store(true, Ordering::SeqCst);
        Ok::<_, io::Error>(Bytes::from(data))
    });
    (Body::from_stream(stream), polled)
}

async fn body_text(response: Response) -> String {
    let bytes = t!(to_bytes(response.into_body(), usize::MAX).await);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn upload_populates_volume() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let archive = single_file_archive(&vol);

    let response = send(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("application/x-tar"),
        archive,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "success\n");

    let dst = vol.join("disk.img");
    assert_eq!(t!(fs::read(&dst)), b"hello");
    let m = t!(dst.symlink_metadata());
    let expected = t!(vol.metadata());
    assert_eq!(m.permissions().mode() & 0o7777, 0o644);
    assert_eq!((m.uid(), m.gid()), (expected.uid(), expected.gid()));
    assert!(!vol.join("data.bin").exists());
}

#[tokio::test]
async fn content_type_parameters_are_ignored() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let archive = single_file_archive(&vol);

    let response = send(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("Application/X-Tar; charset=binary"),
        archive,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(vol.join("disk.img").exists());
}

#[tokio::test]
async fn wrong_cookie_is_rejected() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let archive = single_file_archive(&vol);

    let response = send(
        td.path(),
        "/vol1?cookie=wrong",
        Some("application/x-tar"),
        archive,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(t!(fs::read_dir(&vol)).count(), 0);
}

#[tokio::test]
async fn missing_cookie_is_rejected() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let archive = single_file_archive(&vol);

    let response = send(td.path(), "/vol1", Some("application/x-tar"), archive).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(t!(fs::read_dir(&vol)).count(), 0);
}

#[tokio::test]
async fn wrong_cookie_never_reads_the_body() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let (body, polled) = watched_body(single_file_archive(&vol));

    let response = send_body(
        td.path(),
        "/vol1?cookie=wrong",
        Some("application/x-tar"),
        body,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!polled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn wrong_content_type_never_reads_the_body() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let (body, polled) = watched_body(single_file_archive(&vol));

    let response = send_body(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("application/json"),
        body,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(!polled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn streamed_upload_populates_volume() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let (body, polled) = watched_body(single_file_archive(&vol));

    let response = send_body(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("application/x-tar"),
        body,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(polled.load(Ordering::SeqCst));
    assert_eq!(t!(fs::read(vol.join("disk.img"))), b"hello");
}

#[tokio::test]
async fn cookie_is_checked_before_the_volume() {
    let td = volumes();
    let response = send(td.path(), "/nope?cookie=wrong", None, Vec::new()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_content_type_is_rejected() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let archive = single_file_archive(&vol);

    let uri = format!("/vol1?cookie={COOKIE}");
    let response = send(td.path(), &uri, Some("application/json"), archive.clone()).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let response = send(td.path(), &uri, None, archive).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(t!(fs::read_dir(&vol)).count(), 0);
}

#[tokio::test]
async fn unknown_volume_is_not_found() {
    let td = volumes();
    t!(fs::write(td.path().join("file"), b""));

    for name in ["missing", "file", "..", "%2E%2E", "a%2Fb"] {
        let response = send(
            td.path(),
            &format!("/{name}?cookie={COOKIE}"),
            Some("application/x-tar"),
            b"not read".to_vec(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", name);
    }
}

#[tokio::test]
async fn empty_body_is_a_bad_request() {
    let td = volumes();
    let response = send(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("application/x-tar"),
        Vec::new(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "no data sent\n");
}

#[tokio::test]
async fn extraction_failures_are_not_acceptable() {
    let td = volumes();
    let vol = td.path().join("vol1");
    let mut archive = single_file_archive(&vol);
    archive[0] = b'x';

    let response = send(
        td.path(),
        &format!("/vol1?cookie={COOKIE}"),
        Some("application/x-tar"),
        archive,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert!(body_text(response).await.contains("checksum"));
}
