//! Attachment and history files under `<files_dir>/user_<id>/`.

use std::{
    io,
    path::{Path, PathBuf},
};

use {
    hookgate_channels::{MessagingClient, events::Attachment},
    hookgate_common::UserId,
    serde_json::Value,
    tokio::{fs::OpenOptions, io::AsyncWriteExt},
    tracing::debug,
};

use crate::error::MediaError;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// File extension for a MIME type. Parameters (`; codecs=opus`) are ignored.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/aac" => "aac",
        "application/pdf" => "pdf",
        "video/mp4" => "mp4",
        "text/plain" => "txt",
        _ => "bin",
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => OCTET_STREAM,
    }
}

pub fn user_dir(files_dir: &Path, user_id: UserId) -> PathBuf {
    files_dir.join(format!("user_{user_id}"))
}

async fn ensure_user_dir(files_dir: &Path, user_id: UserId) -> Result<PathBuf, MediaError> {
    let dir = user_dir(files_dir, user_id);
    let dir_err = |source: io::Error| MediaError::Dir {
        path: dir.clone(),
        source,
    };
    tokio::fs::create_dir_all(&dir).await.map_err(dir_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o751))
            .await
            .map_err(dir_err)?;
    }
    Ok(dir)
}

/// Write `data` to `path`, creating it owner read/write only.
async fn write_private(path: &Path, data: &[u8]) -> Result<(), MediaError> {
    let write_err = |source: io::Error| MediaError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await.map_err(write_err)?;
    file.write_all(data).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    Ok(())
}

fn usable_file_stem(message_id: &str) -> bool {
    !message_id.is_empty()
        && message_id != "."
        && message_id != ".."
        && !message_id.contains(['/', '\\', '\0'])
}

/// Download an attachment and store it as `<message-id>.<ext>`.
pub async fn save_attachment(
    client: &dyn MessagingClient,
    files_dir: &Path,
    user_id: UserId,
    message_id: &str,
    attachment: &Attachment,
) -> Result<PathBuf, MediaError> {
    if !usable_file_stem(message_id) {
        return Err(MediaError::InvalidName(message_id.to_string()));
    }
    let dir = ensure_user_dir(files_dir, user_id).await?;
    let data = client.download(&attachment.media).await?;
    let ext = extension_for_mime(&attachment.media.mime_type);
    let path = dir.join(format!("{message_id}.{ext}"));
    write_private(&path, &data).await?;
    debug!(
        user_id = %user_id,
        kind = attachment.kind.as_str(),
        bytes = data.len(),
        path = %path.display(),
        "attachment saved"
    );
    Ok(path)
}

/// Dump a history payload as pretty JSON to `history-<seq>.json`.
pub async fn write_history(
    files_dir: &Path,
    user_id: UserId,
    seq: u64,
    data: &Value,
) -> Result<PathBuf, MediaError> {
    let dir = ensure_user_dir(files_dir, user_id).await?;
    let mut body = serde_json::to_vec_pretty(data)?;
    body.push(b'\n');
    let path = dir.join(format!("history-{seq}.json"));
    write_private(&path, &body).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        hookgate_channels::{
            DeviceProps, MessagingBackend, PlatformType,
            events::{MediaKind, MediaRef},
            loopback::LoopbackBackend,
        },
        serde_json::json,
    };

    fn attachment(path: &str, mime: &str) -> Attachment {
        Attachment {
            kind: MediaKind::Image,
            media: MediaRef {
                direct_path: path.into(),
                mime_type: mime.into(),
                file_length: 0,
                file_name: None,
            },
        }
    }

    async fn loopback_client() -> (LoopbackBackend, std::sync::Arc<dyn MessagingClient>) {
        let backend = LoopbackBackend::new();
        let props = DeviceProps {
            os_name: "Mac OS 10".into(),
            platform: PlatformType::Chrome,
            verbose: false,
        };
        let client = backend.new_identity(&props).await.unwrap();
        (backend, client)
    }

    #[test]
    fn mime_table() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("Application/PDF"), "pdf");
        assert_eq!(extension_for_mime("application/x-thing"), "bin");
        assert_eq!(mime_for_extension("jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("zzz"), OCTET_STREAM);
    }

    #[test]
    fn message_ids_cannot_escape_the_user_dir() {
        assert!(usable_file_stem("3EB0C431D5"));
        assert!(!usable_file_stem(""));
        assert!(!usable_file_stem(".."));
        assert!(!usable_file_stem("../etc/passwd"));
        assert!(!usable_file_stem("a\\b"));
    }

    #[tokio::test]
    async fn jpeg_is_saved_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, client) = loopback_client().await;
        let payload = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 0xFF, 0xD9];
        backend.clients()[0].put_media("/m/img", payload.clone());

        let path = save_attachment(
            client.as_ref(),
            dir.path(),
            UserId(5),
            "MSG1",
            &attachment("/m/img", "image/jpeg"),
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("user_5").join("MSG1.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[tokio::test]
    async fn failed_download_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_backend, client) = loopback_client().await;
        let err = save_attachment(
            client.as_ref(),
            dir.path(),
            UserId(5),
            "MSG1",
            &attachment("/m/missing", "image/png"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::Download(_)));
        assert!(!dir.path().join("user_5").join("MSG1.png").exists());
    }

    #[tokio::test]
    async fn history_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let data = json!({"conversations": [{"id": "1"}]});
        let path = write_history(dir.path(), UserId(2), 7, &data).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "history-7.json");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"conversations\""));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, data);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_history(dir.path(), UserId(2), 1, &json!({}))
            .await
            .unwrap();
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o751);
    }
}
