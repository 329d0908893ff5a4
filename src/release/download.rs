use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use reqwest::{blocking::Client, header::ACCEPT};

use super::{
    CancelToken, ReleaseError,
    catalog::{classify_status, classify_transport},
};

const CHUNK_SIZE: usize = 32 * 1024;

/// Last path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
}

/// Streams `url` into `destination_directory`, reporting the received
/// fraction when the length is known. A partial file never survives an error
/// or a cancellation.
pub fn download(
    client: &Client,
    url: &str,
    destination_directory: &Path,
    progress: &mut dyn FnMut(f64),
    cancel: &CancelToken,
) -> Result<PathBuf, ReleaseError> {
    let file_name = file_name_from_url(url)
        .ok_or_else(|| ReleaseError::Decode(format!("no file name in download URL {url}")))?;
    fs::create_dir_all(destination_directory)
        .map_err(|source| ReleaseError::io(destination_directory, source))?;
    if cancel.is_cancelled() {
        return Err(ReleaseError::Cancelled);
    }

    log::info!("[release] downloading {url}");
    let mut response = client
        .get(url)
        .header(ACCEPT, "application/octet-stream")
        .send()
        .map_err(classify_transport)?;
    if let Some(error) = classify_status(response.status(), response.headers()) {
        log::warn!("[release] download failed: {error}");
        return Err(error);
    }

    let expected = response.content_length().filter(|length| *length > 0);
    let archive_path = destination_directory.join(file_name);
    let result = write_body(&mut response, &archive_path, expected, progress, cancel);
    match result {
        Ok(received) => {
            log::info!(
                "[release] downloaded {} ({received} bytes)",
                archive_path.display()
            );
            Ok(archive_path)
        }
        Err(error) => {
            if let Err(remove_error) = fs::remove_file(&archive_path)
                && remove_error.kind() != io::ErrorKind::NotFound
            {
                log::warn!(
                    "[release] failed to remove partial download {}: {remove_error}",
                    archive_path.display()
                );
            }
            Err(error)
        }
    }
}

fn write_body(
    body: &mut dyn Read,
    path: &Path,
    expected: Option<u64>,
    progress: &mut dyn FnMut(f64),
    cancel: &CancelToken,
) -> Result<u64, ReleaseError> {
    let mut file = File::create(path).map_err(|source| ReleaseError::io(path, source))?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    progress(0.0);

    loop {
        if cancel.is_cancelled() {
            log::info!("[release] download of {} cancelled", path.display());
            return Err(ReleaseError::Cancelled);
        }

        let bytes_read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(bytes_read) => bytes_read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == io::ErrorKind::TimedOut => {
                return Err(ReleaseError::Timeout);
            }
            Err(error) => return Err(ReleaseError::Network(error.to_string())),
        };

        file.write_all(&buffer[..bytes_read])
            .map_err(|source| ReleaseError::io(path, source))?;
        received += bytes_read as u64;

        if let Some(expected) = expected {
            progress((received as f64 / expected as f64).min(1.0));
        }
    }

    file.flush().map_err(|source| ReleaseError::io(path, source))?;
    if let Some(expected) = expected
        && received < expected
    {
        return Err(ReleaseError::Network(format!(
            "connection closed after {received} of {expected} bytes"
        )));
    }
    progress(1.0);
    Ok(received)
}
