mod common;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tempfile::TempDir;
use tile_blob_cache::{Cache, CacheError, CacheOptions};

/// Filesystem-backed cache whose client talks to localhost directly
fn local_cache() -> (Cache, TempDir) {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let cache = Cache::new(CacheOptions::new().root_dir(dir.path()).http_client(client)).unwrap();
    (cache, dir)
}

/// Serve one canned HTTP response and return the base URL
async fn serve_once(status: &str, content_type: &str, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = format!(
        "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\netag: \"tile-v1\"\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_download_stores_body_and_headers() {
    let (cache, _dir) = local_cache();
    let base = serve_once("200 OK", "image/jpeg", b"jpeg bytes").await;
    let url = format!("{base}/tiles/1/2/3");

    let metadata = cache.download(&url).await.unwrap();
    assert_eq!(metadata.key(), Some(url.as_str()));
    assert_eq!(metadata.content_type(), Some("image/jpeg"));
    assert_eq!(metadata.get_str("etag"), Some("\"tile-v1\""));
    assert!(metadata.blob_key().is_some());

    assert!(cache.exists(url.as_str()).await.unwrap());
    let blob = cache.get(url.as_str()).await.unwrap();
    assert_eq!(&blob.data()[..], b"jpeg bytes");
    // no extension on the URL, so the recorded header is used
    assert_eq!(blob.content_type(), "image/jpeg");
}

#[tokio::test]
async fn test_download_error_status_stores_nothing() {
    let (cache, _dir) = local_cache();
    let base = serve_once("404 Not Found", "text/plain", b"missing").await;
    let url = format!("{base}/tiles/9/9/9.png");

    let err = cache.download(&url).await.unwrap_err();
    assert!(matches!(err, CacheError::HttpStatus { status: 404, .. }), "{err}");
    assert!(!cache.exists(url.as_str()).await.unwrap());
}

#[tokio::test]
async fn test_download_connection_refused() {
    let (cache, _dir) = local_cache();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = cache
        .download(&format!("http://{addr}/a.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Http(_)), "{err}");
}
