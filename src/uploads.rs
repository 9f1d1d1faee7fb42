use std::path::{Path as FsPath, PathBuf};

use axum::body::{boxed, Full};
use axum::extract::Path;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use axum::Extension;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::fs::{create_dir_all, remove_file, write};
use uuid::Uuid;

use crate::config::Config;
use crate::err::Error;

pub async fn prepare_uploads(config: &Config) -> anyhow::Result<()> {
    create_dir_all(&config.upload_dir).await?;
    Ok(())
}

/// Decodes a base64 image payload (with or without a `data:image/..;base64,`
/// header) and stores it under the upload directory. Returns the stored
/// filename, to be kept on the owning row.
pub async fn save_base64_image(
    config: &Config,
    data: &str,
    prefix: &str,
) -> Result<String, Error> {
    let bytes = STANDARD.decode(strip_data_uri(data))?;
    let file_name = format!("{}_{}.jpg", prefix, Uuid::new_v4().simple());
    let path = PathBuf::from(&config.upload_dir).join(&file_name);
    write(&path, &bytes).await?;
    Ok(file_name)
}

/// Removes a stored file. Deleting a file that is already gone is fine.
pub async fn delete_file(config: &Config, file_name: &str) -> Result<(), Error> {
    let file_name = sanitize(file_name)?;
    let path = PathBuf::from(&config.upload_dir).join(file_name);
    if path.exists() {
        remove_file(&path).await?;
    }
    Ok(())
}

/// Full public URL for a stored file, as returned in view models.
pub fn public_url(config: &Config, file_name: &str) -> String {
    format!("{}/api/uploads/{}", config.api_url, file_name)
}

pub async fn serve_file(
    Path(file_name): Path<String>,
    Extension(config): Extension<Config>,
) -> Result<Response, Error> {
    let file_name = sanitize(&file_name)?;
    let path = PathBuf::from(&config.upload_dir).join(file_name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| Error::not_found(format!("File not found: {}", file_name)))?;

    Response::builder()
        .header(CONTENT_TYPE, content_type(file_name))
        .body(boxed(Full::from(bytes)))
        .map_err(|err| Error::InternalError {
            kind: "HTTPError",
            message: err.to_string(),
        })
}

fn sanitize(file_name: &str) -> Result<&str, Error> {
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return Err(Error::validation("Invalid file name"));
    }
    Ok(file_name)
}

fn content_type(file_name: &str) -> &'static str {
    match FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn strip_data_uri(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some(idx) = data.find(";base64,") {
            return &data[idx + ";base64,".len()..];
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_data_uri_header() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(sanitize("../secret").is_err());
        assert!(sanitize("a/b.jpg").is_err());
        assert!(sanitize("").is_err());
        assert!(sanitize("class_1_R1_abc.jpg").is_ok());
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type("a.jpg"), "image/jpeg");
        assert_eq!(content_type("a.png"), "image/png");
        assert_eq!(content_type("a.bin"), "application/octet-stream");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }
}
